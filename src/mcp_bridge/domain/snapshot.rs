//! Read model combining a descriptor with its runtime status.

use super::{ResourceDefinition, ServerDescriptor, ToolDefinition};
use serde::Serialize;

/// Descriptor plus runtime status, as pushed to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSnapshot {
    /// Persisted descriptor.
    pub descriptor: ServerDescriptor,
    /// Whether a connection runtime exists.
    pub connected: bool,
    /// Last known tools; empty when not running.
    pub tools: Vec<ToolDefinition>,
    /// Last known resources; empty when not running.
    pub resources: Vec<ResourceDefinition>,
}

impl ServerSnapshot {
    /// Creates a snapshot for a server without a runtime.
    #[must_use]
    pub const fn stopped(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            connected: false,
            tools: Vec::new(),
            resources: Vec::new(),
        }
    }
}
