//! Unit tests for the fleet services, driven through the in-memory adapters.

mod orchestrator_tests;

use crate::mcp_bridge::{
    adapters::memory::{
        InMemoryCapabilityRegistry, InMemoryServerStore, InMemoryToolServerHost,
        RecordingNotifier,
    },
    domain::{NewServer, ServerDescriptor, ServerName, ServerTransport, ToolDefinition},
    services::{
        BridgeAttachment, CapabilityBridge, ConnectionSettings, EventBus, EventKind,
        OrchestratorSettings, ServerLifecycleOrchestrator, Subscription,
    },
};
use mockable::DefaultClock;
use rstest::fixture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(super) type TestOrchestrator =
    ServerLifecycleOrchestrator<InMemoryServerStore, InMemoryToolServerHost, DefaultClock>;

pub(super) const fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        connection: ConnectionSettings {
            retries: 2,
            retry_delay: Duration::from_millis(5),
        },
        stop_grace: Duration::from_millis(100),
        log_tail_lines: 5,
    }
}

/// A wired fleet: orchestrator, bridge attached to its bus, recording
/// collaborators.
pub(super) struct Fleet {
    pub host: InMemoryToolServerHost,
    pub store: Arc<InMemoryServerStore>,
    pub registry: Arc<InMemoryCapabilityRegistry>,
    pub notifier: RecordingNotifier,
    pub bridge: CapabilityBridge,
    pub orchestrator: TestOrchestrator,
    pub attachment: BridgeAttachment,
}

impl Fleet {
    pub fn with_store(store: InMemoryServerStore) -> Self {
        let host = InMemoryToolServerHost::new();
        let store = Arc::new(store);
        let registry = Arc::new(InMemoryCapabilityRegistry::new());
        let notifier = RecordingNotifier::new();
        let bridge = CapabilityBridge::new(Arc::clone(&registry) as _);
        let bus = EventBus::new();
        let attachment = bridge.attach(&bus);
        let orchestrator = ServerLifecycleOrchestrator::new(
            Arc::clone(&store),
            Arc::new(host.clone()),
            Arc::new(DefaultClock),
            bus,
            Arc::new(notifier.clone()),
            fast_settings(),
        );
        Self {
            host,
            store,
            registry,
            notifier,
            bridge,
            orchestrator,
            attachment,
        }
    }

    /// Adds a disabled process server launched with `command`.
    pub async fn add_process(&self, name: &str, command: &str) -> ServerDescriptor {
        self.orchestrator
            .add_server(process_request(name, command))
            .await
            .expect("adding a server should succeed")
    }

    /// Counts `ServerStopped` events from now on.
    pub fn count_stops(&self) -> (Arc<AtomicUsize>, Subscription) {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let subscription = self
            .orchestrator
            .bus()
            .subscribe_kind(EventKind::ServerStopped, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        (stops, subscription)
    }
}

#[fixture]
pub(super) fn fleet() -> Fleet {
    Fleet::with_store(InMemoryServerStore::new())
}

pub(super) fn process_request(name: &str, command: &str) -> NewServer {
    NewServer::new(
        ServerName::new(name).expect("valid server name"),
        ServerTransport::process(command).expect("valid command"),
    )
}

pub(super) fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(name)
        .expect("valid tool name")
        .with_description(format!("Tool {name}"))
}

/// Polls `condition` until it holds or two seconds pass.
pub(super) async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
