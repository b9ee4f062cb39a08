//! Shared wiring for fleet integration tests.

use std::sync::Arc;
use std::time::Duration;

use mockable::DefaultClock;
use rstest::fixture;
use switchboard::mcp_bridge::{
    adapters::memory::{
        InMemoryCapabilityRegistry, InMemoryServerStore, InMemoryToolServerHost,
        RecordingNotifier,
    },
    domain::{NewServer, ServerName, ServerTransport, ToolDefinition},
    ports::ServerDescriptorStore,
    services::{
        BridgeAttachment, CapabilityBridge, ConnectionSettings, EventBus, OrchestratorSettings,
        ServerLifecycleOrchestrator,
    },
};

/// Orchestrator over an arbitrary store and the in-memory host.
pub type Orchestrator<S> = ServerLifecycleOrchestrator<S, InMemoryToolServerHost, DefaultClock>;

/// Orchestrator plus the collaborators tests inspect.
pub struct Harness<S: ServerDescriptorStore + 'static> {
    /// Scripted process and endpoint host.
    pub host: InMemoryToolServerHost,
    /// Host capability registry fed by the bridge.
    pub registry: Arc<InMemoryCapabilityRegistry>,
    /// Records user-facing notifications.
    pub notifier: RecordingNotifier,
    /// Service under test.
    pub orchestrator: Orchestrator<S>,
    /// Keeps the bridge subscribed for the harness lifetime.
    pub attachment: BridgeAttachment,
}

impl<S: ServerDescriptorStore + 'static> Harness<S> {
    /// Wires a fleet over `store` using `host`.
    #[must_use]
    pub fn new(store: Arc<S>, host: InMemoryToolServerHost) -> Self {
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let notifier = RecordingNotifier::new();
        let bridge = CapabilityBridge::new(Arc::clone(&registry) as _);
        let bus = EventBus::new();
        let attachment = bridge.attach(&bus);
        let orchestrator = ServerLifecycleOrchestrator::new(
            store,
            Arc::new(host.clone()),
            Arc::new(DefaultClock),
            bus,
            Arc::new(notifier.clone()),
            settings(),
        );
        Self {
            host,
            registry,
            notifier,
            orchestrator,
            attachment,
        }
    }
}

/// Short retry and grace periods so failure paths finish quickly.
#[must_use]
pub const fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        connection: ConnectionSettings {
            retries: 1,
            retry_delay: Duration::from_millis(5),
        },
        stop_grace: Duration::from_millis(100),
        log_tail_lines: 5,
    }
}

/// Provides a fleet over a fresh in-memory store.
#[fixture]
pub fn harness() -> Harness<InMemoryServerStore> {
    Harness::new(
        Arc::new(InMemoryServerStore::new()),
        InMemoryToolServerHost::new(),
    )
}

/// Builds an add request for a process server.
///
/// # Panics
///
/// Panics when `name` or `command` is blank.
#[must_use]
pub fn process_server(name: &str, command: &str) -> NewServer {
    NewServer::new(
        ServerName::new(name).expect("valid server name"),
        ServerTransport::process(command).expect("valid command"),
    )
}

/// Builds a described tool definition.
///
/// # Panics
///
/// Panics when `name` is blank.
#[must_use]
pub fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(name)
        .expect("valid tool name")
        .with_description(format!("Tool {name}"))
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
