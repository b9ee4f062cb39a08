//! Lifecycle orchestration tests.

use super::{Fleet, eventually, fast_settings, fleet, process_request, tool};
use crate::mcp_bridge::{
    adapters::memory::{
        HostEvent, InMemoryServerStore, InMemoryToolServerHost, RecordingNotifier, ScriptedServer,
    },
    domain::{
        NewServer, ServerDescriptor, ServerDescriptorUpdate, ServerDomainError, ServerId,
        ServerName, ServerTransport, qualify_tool_name,
    },
    ports::{MockServerDescriptorStore, ProcessExit, ServerStoreError},
    services::{
        EventBus, FleetServiceError, ServerEvent, ServerLifecycleOrchestrator, StartOutcome,
        StopReason,
    },
};
use mockable::DefaultClock;
use rstest::rstest;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn enabled_descriptor(name: &str, command: &str) -> ServerDescriptor {
    let mut descriptor = ServerDescriptor::new(process_request(name, command), &DefaultClock);
    descriptor.set_enabled(true, &DefaultClock);
    descriptor
}

fn launches(journal: &[HostEvent]) -> Vec<String> {
    journal
        .iter()
        .filter_map(|event| match event {
            HostEvent::Launched { target, .. } => Some(target.clone()),
            _ => None,
        })
        .collect()
}

fn count_events(journal: &[HostEvent], predicate: impl Fn(&HostEvent) -> bool) -> usize {
    journal.iter().filter(|event| predicate(event)).count()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn added_server_is_disabled_and_persisted(fleet: Fleet) {
    let added = fleet.add_process("workspace", "echo-server").await;

    assert!(!added.enabled());
    assert!(!fleet.orchestrator.is_running(added.id()));
    assert_eq!(fleet.store.persisted(), vec![added.clone()]);
    assert_eq!(fleet.orchestrator.descriptors(), vec![added]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_save_discards_the_added_server(fleet: Fleet) {
    fleet.store.set_fail_saves(true);

    let result = fleet
        .orchestrator
        .add_server(process_request("workspace", "echo-server"))
        .await;

    assert!(matches!(result, Err(FleetServiceError::Store(_))));
    assert!(fleet.orchestrator.descriptors().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn start_registers_runtime_and_tools(fleet: Fleet) {
    fleet.host.install(
        "echo-server",
        ScriptedServer::new().with_tools(vec![tool("ping"), tool("search")]),
    );
    let added = fleet.add_process("workspace", "echo-server").await;

    let outcome = fleet.orchestrator.start_server(added.id()).await;

    assert_eq!(outcome, StartOutcome::Started);
    assert!(fleet.orchestrator.is_running(added.id()));
    assert!(fleet.orchestrator.started_at(added.id()).is_some());
    let snapshot = fleet
        .orchestrator
        .snapshot(added.id())
        .expect("snapshot should exist");
    assert!(snapshot.connected);
    assert_eq!(snapshot.tools.len(), 2);
    assert_eq!(
        fleet.registry.names_for_server(added.id()),
        vec![
            qualify_tool_name(added.id(), "ping"),
            qualify_tool_name(added.id(), "search"),
        ]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_a_no_op(fleet: Fleet) {
    fleet
        .host
        .install("echo-server", ScriptedServer::new().with_tools(vec![tool("ping")]));
    let added = fleet.add_process("workspace", "echo-server").await;

    let first = fleet.orchestrator.start_server(added.id()).await;
    let second = fleet.orchestrator.start_server(added.id()).await;

    assert_eq!(first, StartOutcome::Started);
    assert_eq!(second, StartOutcome::AlreadyRunning);
    assert_eq!(fleet.host.launch_count(added.id()), 1);
    assert_eq!(fleet.registry.tool_names().len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_launch_once(fleet: Fleet) {
    fleet
        .host
        .install("echo-server", ScriptedServer::new().with_tools(vec![tool("ping")]));
    let added = fleet.add_process("workspace", "echo-server").await;

    let (first, second) = tokio::join!(
        fleet.orchestrator.start_server(added.id()),
        fleet.orchestrator.start_server(added.id()),
    );

    let mut outcomes = vec![first, second];
    outcomes.sort_by_key(|outcome| *outcome == StartOutcome::Started);
    assert_eq!(
        outcomes,
        vec![StartOutcome::AlreadyRunning, StartOutcome::Started]
    );
    assert_eq!(fleet.host.launch_count(added.id()), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_emits_once(fleet: Fleet) {
    fleet.host.install("echo-server", ScriptedServer::new());
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet.orchestrator.start_server(added.id()).await;
    let (stops, _subscription) = fleet.count_stops();

    let first = fleet.orchestrator.stop_server(added.id()).await;
    let second = fleet.orchestrator.stop_server(added.id()).await;

    assert!(first);
    assert!(!second);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(!fleet.host.is_alive(added.id()));
    let journal = fleet.host.journal_for(added.id());
    assert_eq!(
        count_events(&journal, |event| matches!(event, HostEvent::Closed { .. })),
        1
    );
    assert_eq!(
        count_events(&journal, |event| matches!(event, HostEvent::Terminated { .. })),
        1
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stop_escalates_to_kill_after_grace(fleet: Fleet) {
    fleet
        .host
        .install("stubborn-server", ScriptedServer::new().ignoring_terminate());
    let added = fleet.add_process("stubborn", "stubborn-server").await;
    fleet.orchestrator.start_server(added.id()).await;

    assert!(fleet.orchestrator.stop_server(added.id()).await);

    let journal = fleet.host.journal_for(added.id());
    let kinds: Vec<&str> = journal
        .iter()
        .filter_map(|event| match event {
            HostEvent::Terminated { .. } => Some("terminated"),
            HostEvent::Killed { .. } => Some("killed"),
            HostEvent::Exited { .. } => Some("exited"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["terminated", "killed", "exited"]);
    assert_eq!(fleet.host.live_process_count(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn missing_command_fails_and_disables(fleet: Fleet) {
    let added = fleet.add_process("ghost", "not-installed").await;

    let updated = fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("update should succeed")
        .expect("server should exist");

    assert!(!updated.enabled());
    assert!(!fleet.orchestrator.is_running(added.id()));
    assert!(
        fleet
            .store
            .persisted()
            .iter()
            .all(|descriptor| !descriptor.enabled())
    );
    let errors = fleet.notifier.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().any(|message| message.contains("Failed to start")));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn connect_is_attempted_retries_plus_one_times(fleet: Fleet) {
    fleet
        .host
        .install("flaky-server", ScriptedServer::new().failing_connects(10));
    let added = fleet.add_process("flaky", "flaky-server").await;

    let outcome = fleet.orchestrator.start_server(added.id()).await;

    assert!(matches!(outcome, StartOutcome::Failed { .. }));
    let expected = usize::try_from(fast_settings().connection.retries + 1).expect("small count");
    assert_eq!(fleet.host.open_attempts(added.id()), expected);
    assert!(!fleet.host.is_alive(added.id()));
    assert!(fleet.registry.tool_names().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transient_refusals_are_retried(fleet: Fleet) {
    fleet.host.install(
        "flaky-server",
        ScriptedServer::new()
            .failing_connects(2)
            .with_tools(vec![tool("ping")]),
    );
    let added = fleet.add_process("flaky", "flaky-server").await;

    let outcome = fleet.orchestrator.start_server(added.id()).await;

    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(fleet.host.open_attempts(added.id()), 3);
    assert_eq!(fleet.registry.names_for_server(added.id()).len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failure_message_quotes_recent_stderr(fleet: Fleet) {
    fleet.host.install(
        "noisy-server",
        ScriptedServer::new()
            .failing_connects(10)
            .with_stderr(["missing API key".to_owned()]),
    );
    let added = fleet.add_process("noisy", "noisy-server").await;

    let outcome = fleet.orchestrator.start_server(added.id()).await;

    let StartOutcome::Failed { message } = outcome else {
        panic!("start should fail, got {outcome:?}");
    };
    assert!(message.contains("missing API key"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn crash_disables_and_emits_one_stop(fleet: Fleet) {
    fleet.host.install(
        "fragile-server",
        ScriptedServer::new()
            .with_tools(vec![tool("ping")])
            .with_stderr(["panic: out of memory".to_owned()]),
    );
    let added = fleet.add_process("fragile", "fragile-server").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    assert!(fleet.orchestrator.is_running(added.id()));

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&reasons);
    let _subscription = fleet.orchestrator.bus().subscribe(move |event| {
        if let ServerEvent::ServerStopped { reason, .. } = event {
            recorded.lock().expect("reasons lock").push(*reason);
        }
    });

    assert_eq!(fleet.host.crash(added.id(), 137), 1);
    assert!(eventually(|| !reasons.lock().expect("reasons lock").is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        *reasons.lock().expect("reasons lock"),
        vec![StopReason::Crashed {
            exit: ProcessExit::with_code(137)
        }]
    );
    assert!(!fleet.orchestrator.is_running(added.id()));
    assert!(fleet.registry.tool_names().is_empty());
    let descriptor = fleet
        .orchestrator
        .descriptor(added.id())
        .expect("descriptor is kept");
    assert!(!descriptor.enabled());
    let errors = fleet.notifier.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().any(|message| {
        message.contains("exited unexpectedly") && message.contains("panic: out of memory")
    }));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn requested_stop_is_not_reported_as_crash(fleet: Fleet) {
    fleet.host.install("echo-server", ScriptedServer::new());
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    let (stops, _subscription) = fleet.count_stops();

    fleet.orchestrator.stop_server(added.id()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(fleet.notifier.errors().is_empty());
    let descriptor = fleet
        .orchestrator
        .descriptor(added.id())
        .expect("descriptor is kept");
    assert!(descriptor.enabled());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn restart_relaunches_the_server(fleet: Fleet) {
    fleet.host.install("echo-server", ScriptedServer::new());
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet.orchestrator.start_server(added.id()).await;

    let outcome = fleet.orchestrator.restart_server(added.id()).await;

    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(fleet.host.launch_count(added.id()), 2);
    assert_eq!(fleet.host.live_process_count(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn command_edit_restarts_exactly_once(fleet: Fleet) {
    fleet
        .host
        .install("server-a", ScriptedServer::new().with_tools(vec![tool("alpha")]));
    fleet
        .host
        .install("server-b", ScriptedServer::new().with_tools(vec![tool("beta")]));
    let added = fleet.add_process("switching", "server-a").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    let (stops, _subscription) = fleet.count_stops();

    fleet
        .orchestrator
        .update_server(
            added.id(),
            ServerDescriptorUpdate::default().with_command("server-b"),
        )
        .await
        .expect("edit should succeed");

    let journal = fleet.host.journal_for(added.id());
    assert_eq!(launches(&journal), vec!["server-a", "server-b"]);
    assert_eq!(
        count_events(&journal, |event| matches!(event, HostEvent::Terminated { .. })),
        1
    );
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        fleet.registry.names_for_server(added.id()),
        vec![qualify_tool_name(added.id(), "beta")]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn launch_edit_that_disables_only_stops(fleet: Fleet) {
    fleet.host.install("server-a", ScriptedServer::new());
    fleet.host.install("server-b", ScriptedServer::new());
    let added = fleet.add_process("switching", "server-a").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");

    fleet
        .orchestrator
        .update_server(
            added.id(),
            ServerDescriptorUpdate::default()
                .with_command("server-b")
                .with_enabled(false),
        )
        .await
        .expect("edit should succeed");

    assert!(!fleet.orchestrator.is_running(added.id()));
    assert_eq!(fleet.host.launch_count(added.id()), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rename_keeps_the_server_running(fleet: Fleet) {
    fleet.host.install("echo-server", ScriptedServer::new());
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");

    let renamed = fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::default().with_name("tools"))
        .await
        .expect("rename should succeed")
        .expect("server should exist");

    assert_eq!(renamed.name().as_str(), "tools");
    assert!(fleet.orchestrator.is_running(added.id()));
    assert_eq!(fleet.host.launch_count(added.id()), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reenabling_a_stopped_server_starts_it(fleet: Fleet) {
    fleet.host.install("echo-server", ScriptedServer::new());
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    assert!(fleet.orchestrator.stop_server(added.id()).await);

    let updated = fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed")
        .expect("server should exist");

    assert!(updated.enabled());
    assert!(fleet.orchestrator.is_running(added.id()));
    assert_eq!(fleet.host.launch_count(added.id()), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn editing_a_loaded_enabled_server_starts_it() {
    let descriptor = enabled_descriptor("workspace", "echo-server");
    let fleet = Fleet::with_store(InMemoryServerStore::with_servers(vec![descriptor.clone()]));
    fleet.host.install("echo-server", ScriptedServer::new());
    fleet.orchestrator.load_servers().await;
    assert!(!fleet.orchestrator.is_running(descriptor.id()));

    fleet
        .orchestrator
        .update_server(descriptor.id(), ServerDescriptorUpdate::default().with_name("tools"))
        .await
        .expect("rename should succeed");

    assert!(fleet.orchestrator.is_running(descriptor.id()));
    assert_eq!(fleet.host.launch_count(descriptor.id()), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cross_kind_edit_is_rejected(fleet: Fleet) {
    let added = fleet.add_process("workspace", "echo-server").await;
    let saves_before = fleet.store.save_count();

    let result = fleet
        .orchestrator
        .update_server(
            added.id(),
            ServerDescriptorUpdate::default().with_endpoint_url("http://localhost:9/mcp"),
        )
        .await;

    assert!(matches!(
        result,
        Err(FleetServiceError::Domain(
            ServerDomainError::FieldNotApplicable { .. }
        ))
    ));
    assert_eq!(fleet.orchestrator.descriptor(added.id()), Some(added));
    assert_eq!(fleet.store.save_count(), saves_before);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_save_reverts_the_edit(fleet: Fleet) {
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet.store.set_fail_saves(true);

    let result = fleet
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::default().with_name("tools"))
        .await;

    assert!(matches!(result, Err(FleetServiceError::Store(_))));
    assert_eq!(fleet.orchestrator.descriptor(added.id()), Some(added));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_ids_are_reported(fleet: Fleet) {
    let missing = ServerId::new();

    let updated = fleet
        .orchestrator
        .update_server(missing, ServerDescriptorUpdate::enabled(true))
        .await
        .expect("unknown id is not an error");
    let removed = fleet
        .orchestrator
        .remove_server(missing)
        .await
        .expect("unknown id is not an error");

    assert_eq!(updated, None);
    assert!(!removed);
    assert_eq!(
        fleet.orchestrator.start_server(missing).await,
        StartOutcome::NotFound
    );
    assert!(!fleet.orchestrator.stop_server(missing).await);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn remove_tears_down_before_returning(fleet: Fleet) {
    fleet.host.install(
        "echo-server",
        ScriptedServer::new().with_tools(vec![tool("ping")]),
    );
    let added = fleet.add_process("workspace", "echo-server").await;
    fleet.orchestrator.start_server(added.id()).await;

    let removed = fleet
        .orchestrator
        .remove_server(added.id())
        .await
        .expect("remove should succeed");

    assert!(removed);
    assert!(!fleet.orchestrator.is_running(added.id()));
    assert!(!fleet.host.is_alive(added.id()));
    assert!(fleet.registry.tool_names().is_empty());
    assert!(fleet.orchestrator.descriptor(added.id()).is_none());
    assert!(fleet.store.persisted().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stream_servers_have_no_process(fleet: Fleet) {
    let url = "http://localhost:9/mcp";
    fleet
        .host
        .install(url, ScriptedServer::new().with_tools(vec![tool("search")]));
    let added = fleet
        .orchestrator
        .add_server(NewServer::new(
            ServerName::new("remote").expect("valid name"),
            ServerTransport::stream(url).expect("valid url"),
        ))
        .await
        .expect("add should succeed");

    assert_eq!(
        fleet.orchestrator.start_server(added.id()).await,
        StartOutcome::Started
    );
    assert_eq!(fleet.host.live_process_count(), 0);
    assert!(fleet.orchestrator.recent_logs(added.id(), 10).is_empty());

    assert!(fleet.orchestrator.stop_server(added.id()).await);
    let journal = fleet.host.journal_for(added.id());
    assert_eq!(
        count_events(&journal, |event| matches!(event, HostEvent::Closed { .. })),
        1
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn startup_isolates_failures() {
    let good = enabled_descriptor("good", "echo-server");
    let bad = enabled_descriptor("bad", "not-installed");
    let idle = ServerDescriptor::new(process_request("idle", "echo-server"), &DefaultClock);
    let fleet = Fleet::with_store(InMemoryServerStore::with_servers(vec![
        good.clone(),
        bad.clone(),
        idle.clone(),
    ]));
    fleet.host.install("echo-server", ScriptedServer::new());

    let loaded = fleet.orchestrator.load_servers().await;
    let outcomes = fleet.orchestrator.start_enabled_servers().await;

    assert_eq!(loaded.len(), 3);
    assert_eq!(outcomes.len(), 2);
    assert!(fleet.orchestrator.is_running(good.id()));
    assert!(!fleet.orchestrator.is_running(bad.id()));
    assert!(!fleet.orchestrator.is_running(idle.id()));
    let bad_outcome = outcomes
        .iter()
        .find(|(id, _)| *id == bad.id())
        .map(|(_, outcome)| outcome.clone());
    assert!(matches!(bad_outcome, Some(StartOutcome::Failed { .. })));

    fleet.orchestrator.shutdown().await;
    assert_eq!(fleet.host.live_process_count(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_reload_keeps_the_current_fleet() {
    let existing = ServerDescriptor::new(process_request("kept", "echo-server"), &DefaultClock);
    let fleet = Fleet::with_store(InMemoryServerStore::with_servers(vec![existing.clone()]));
    fleet.orchestrator.load_servers().await;
    fleet.store.set_fail_loads(true);

    let reloaded = fleet.orchestrator.load_servers().await;

    assert!(reloaded.is_empty());
    assert_eq!(fleet.orchestrator.descriptors(), vec![existing]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_store_loads_nothing() {
    let mut store = MockServerDescriptorStore::new();
    store.expect_load().times(1).returning(|| {
        Err(ServerStoreError::invalid_persisted_data(
            std::io::Error::other("truncated document"),
        ))
    });
    store.expect_save().never();
    let orchestrator = ServerLifecycleOrchestrator::new(
        Arc::new(store),
        Arc::new(InMemoryToolServerHost::new()),
        Arc::new(DefaultClock),
        EventBus::new(),
        Arc::new(RecordingNotifier::new()),
        fast_settings(),
    );

    let loaded = orchestrator.load_servers().await;

    assert!(loaded.is_empty());
    assert!(orchestrator.snapshots().is_empty());
}
