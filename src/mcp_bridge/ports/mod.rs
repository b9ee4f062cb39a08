//! Port contracts for the tool server fleet bridge.
//!
//! Each collaborator outside the bridge core is reached through one of these
//! traits: descriptor persistence, the host capability registry, UI
//! notifications, process launching and the protocol transport.

mod launcher;
mod notifier;
mod registry;
mod store;
mod transport;

pub use launcher::{
    LaunchedServer, LogSink, ProcessControl, ProcessError, ProcessExit, ServerLauncher,
    SpawnedProcess,
};
pub use notifier::ServerNotifier;
pub use registry::{
    CapabilityRegistry, OutputPart, RegistrationConflict, RegistrationHandle, ResourceReadError,
    ResourceReader, ResourceRegistration, ToolInvocationError, ToolInvoker, ToolOutput,
    ToolRegistration,
};
#[cfg(test)]
pub use store::MockServerDescriptorStore;
pub use store::{ServerDescriptorStore, ServerStoreError, ServerStoreResult};
pub use transport::{
    METHOD_NOT_FOUND, ProtocolError, ProtocolTransport, TransportConnector,
};
