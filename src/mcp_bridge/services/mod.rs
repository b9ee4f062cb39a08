//! Application services for the tool server fleet bridge.

mod bridge;
mod connection;
mod events;
mod orchestrator;
mod panel;

pub use bridge::{
    BridgeAttachment, CapabilityBridge, CapabilityRegistration, EMPTY_RESULT_TEXT,
    ResourceRegistrar, SERVER_ID_PLACEHOLDER, SERVER_NAME_PLACEHOLDER, ToolRegistrar,
    substitute_placeholders,
};
pub use connection::{
    ClientHandle, ConnectionError, ConnectionSettings, PROTOCOL_VERSION,
    ProtocolClientConnection, ServerInfo, SessionError,
};
pub use events::{EventBus, EventKind, ServerEvent, StopReason, Subscription};
pub use orchestrator::{
    FleetServiceError, FleetServiceResult, FleetView, OrchestratorSettings,
    ServerLifecycleOrchestrator, StartOutcome,
};
pub use panel::ServerPanel;

#[cfg(test)]
mod tests;
