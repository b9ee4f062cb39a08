//! End-to-end fleet behaviour over the in-memory host.

use super::helpers::{Harness, eventually, harness, process_server, tool};
use rstest::rstest;
use serde_json::Map;
use switchboard::mcp_bridge::{
    adapters::memory::{InMemoryServerStore, ScriptedReply, ScriptedServer},
    domain::{NewServer, ServerDescriptorUpdate, ServerName, ServerTransport, qualify_tool_name},
    services::StartOutcome,
};
use tokio_util::sync::CancellationToken;

type Fleet = Harness<InMemoryServerStore>;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn enabled_server_serves_tools_until_disabled(harness: Fleet) {
    harness.host.install(
        "search-server",
        ScriptedServer::new()
            .with_tools(vec![tool("lookup")])
            .with_reply("lookup", ScriptedReply::Text("found".to_owned())),
    );
    let added = harness
        .orchestrator
        .add_server(process_server("search", "search-server"))
        .await
        .expect("add should succeed");

    harness
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    let name = qualify_tool_name(added.id(), "lookup");
    let output = harness
        .registry
        .invoke_tool(&name, Map::new(), CancellationToken::new())
        .await
        .expect("registered tool answers");
    assert_eq!(output.text(), "found");

    harness
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(false))
        .await
        .expect("disable should succeed");

    assert!(harness.registry.tool_names().is_empty());
    assert!(!harness.orchestrator.is_running(added.id()));
    assert!(!harness.host.is_alive(added.id()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn crashed_server_is_disabled_and_reported(harness: Fleet) {
    harness.host.install(
        "fragile-server",
        ScriptedServer::new()
            .with_tools(vec![tool("ping")])
            .with_stderr(vec!["panic: out of memory".to_owned()]),
    );
    let added = harness
        .orchestrator
        .add_server(process_server("fragile", "fragile-server"))
        .await
        .expect("add should succeed");
    harness
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");

    harness.host.crash(added.id(), 2);

    let orchestrator = harness.orchestrator.clone();
    let id = added.id();
    assert!(eventually(|| !orchestrator.view().is_enabled(id)).await);
    assert!(harness.registry.tool_names().is_empty());
    let errors = harness.notifier.errors();
    assert!(
        errors
            .iter()
            .any(|message| message.contains("exited unexpectedly")
                && message.contains("out of memory")),
        "unexpected errors: {errors:?}"
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn startup_runs_only_enabled_servers(harness: Fleet) {
    harness.host.install("echo-server", ScriptedServer::new());
    let enabled = harness
        .orchestrator
        .add_server(process_server("enabled", "echo-server"))
        .await
        .expect("add should succeed");
    let dormant = harness
        .orchestrator
        .add_server(process_server("dormant", "echo-server"))
        .await
        .expect("add should succeed");
    harness
        .orchestrator
        .update_server(enabled.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    harness.orchestrator.shutdown().await;

    let outcomes = harness.orchestrator.start_enabled_servers().await;

    assert_eq!(outcomes, vec![(enabled.id(), StartOutcome::Started)]);
    assert!(!harness.orchestrator.is_running(dormant.id()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stream_server_registers_remote_tools(harness: Fleet) {
    harness.host.install(
        "https://tools.example.com/mcp",
        ScriptedServer::new().with_tools(vec![tool("translate")]),
    );
    let added = harness
        .orchestrator
        .add_server(NewServer::new(
            ServerName::new("remote").expect("valid name"),
            ServerTransport::stream("https://tools.example.com/mcp").expect("valid url"),
        ))
        .await
        .expect("add should succeed");

    let outcome = harness.orchestrator.start_server(added.id()).await;

    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(
        harness.registry.tool_names(),
        vec![qualify_tool_name(added.id(), "translate")]
    );
    assert_eq!(harness.host.live_process_count(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn removal_is_reported_and_final(harness: Fleet) {
    harness
        .host
        .install("echo-server", ScriptedServer::new().with_tools(vec![tool("ping")]));
    let added = harness
        .orchestrator
        .add_server(process_server("echo", "echo-server"))
        .await
        .expect("add should succeed");
    harness.orchestrator.start_server(added.id()).await;

    let removed = harness
        .orchestrator
        .remove_server(added.id())
        .await
        .expect("remove should succeed");

    assert!(removed);
    assert!(harness.orchestrator.descriptors().is_empty());
    assert!(harness.registry.tool_names().is_empty());
    assert!(!harness.host.is_alive(added.id()));
    assert_eq!(
        harness.orchestrator.remove_server(added.id()).await.ok(),
        Some(false)
    );
}
