//! Fleet persistence through the JSON file store.

use std::sync::Arc;
use std::time::Duration;

use super::helpers::{Harness, eventually, process_server, tool};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use switchboard::mcp_bridge::{
    adapters::{
        file::JsonFileServerStore,
        memory::{InMemoryToolServerHost, ScriptedServer},
    },
    domain::{ServerDescriptorUpdate, qualify_tool_name},
    ports::ServerDescriptorStore,
    services::StartOutcome,
};
use tempfile::TempDir;

struct StoreContext {
    _dir: TempDir,
    path: Utf8PathBuf,
    host: InMemoryToolServerHost,
}

impl StoreContext {
    fn store(&self) -> Arc<JsonFileServerStore> {
        Arc::new(JsonFileServerStore::new(self.path.clone()))
    }

    fn harness(&self) -> Harness<JsonFileServerStore> {
        Harness::new(self.store(), self.host.clone())
    }
}

#[fixture]
fn context() -> StoreContext {
    let dir = TempDir::new().expect("temporary directory");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    let host = InMemoryToolServerHost::new();
    host.install(
        "notes-server",
        ScriptedServer::new().with_tools(vec![tool("append")]),
    );
    StoreContext {
        _dir: dir,
        path: root.join("config/servers.json"),
        host,
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn enabled_servers_come_back_after_restart(context: StoreContext) {
    let first_run = context.harness();
    let added = first_run
        .orchestrator
        .add_server(process_server("notes", "notes-server"))
        .await
        .expect("add should succeed");
    first_run
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");
    first_run.orchestrator.shutdown().await;

    let second_run = context.harness();
    let loaded = second_run.orchestrator.load_servers().await;
    let outcomes = second_run.orchestrator.start_enabled_servers().await;

    assert_eq!(loaded.len(), 1);
    assert!(loaded.iter().all(|descriptor| descriptor.id() == added.id()));
    assert_eq!(outcomes, vec![(added.id(), StartOutcome::Started)]);
    assert_eq!(
        second_run.registry.tool_names(),
        vec![qualify_tool_name(added.id(), "append")]
    );
    second_run.orchestrator.shutdown().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn crash_disable_is_persisted(context: StoreContext) {
    let harness = context.harness();
    let added = harness
        .orchestrator
        .add_server(process_server("notes", "notes-server"))
        .await
        .expect("add should succeed");
    harness
        .orchestrator
        .update_server(added.id(), ServerDescriptorUpdate::enabled(true))
        .await
        .expect("enable should succeed");

    context.host.crash(added.id(), 1);
    let orchestrator = harness.orchestrator.clone();
    let id = added.id();
    assert!(eventually(|| !orchestrator.view().is_enabled(id)).await);

    let store = context.store();
    let mut persisted = false;
    for _ in 0..200 {
        let servers = store.load().await.expect("store should load");
        if servers.iter().all(|server| !server.enabled()) {
            persisted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(persisted, "disabled descriptor was never saved");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn edits_survive_a_reload(context: StoreContext) {
    let harness = context.harness();
    let added = harness
        .orchestrator
        .add_server(process_server("notes", "notes-server"))
        .await
        .expect("add should succeed");
    harness
        .orchestrator
        .update_server(
            added.id(),
            ServerDescriptorUpdate::default()
                .with_name("journal")
                .with_args(vec!["--verbose".to_owned()]),
        )
        .await
        .expect("edit should succeed");

    let reloaded = context.harness().orchestrator.load_servers().await;

    assert_eq!(reloaded, harness.orchestrator.descriptors());
    assert!(
        reloaded
            .iter()
            .all(|descriptor| descriptor.name().as_str() == "journal")
    );
}
