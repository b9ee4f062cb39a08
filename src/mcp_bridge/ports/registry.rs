//! Host capability registry port.
//!
//! The host publishes invocable tools and readable resources under
//! qualified names. Registrations are pure runtime calls returning a handle
//! that is later passed back to `unregister`.

use crate::mcp_bridge::domain::{
    ResourceContents, ResourceDefinition, ServerId, ServerName, ToolDefinition,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Host namespace where tools and resources are published.
pub trait CapabilityRegistry: Send + Sync {
    /// Publishes a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationConflict`] when the qualified name is taken.
    fn register_tool(
        &self,
        registration: ToolRegistration,
    ) -> Result<RegistrationHandle, RegistrationConflict>;

    /// Publishes a resource.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationConflict`] when the key is taken.
    fn register_resource(
        &self,
        registration: ResourceRegistration,
    ) -> Result<RegistrationHandle, RegistrationConflict>;

    /// Withdraws a registration. Returns `false` when it was already gone.
    fn unregister(&self, handle: &RegistrationHandle) -> bool;
}

/// Disposable token identifying one registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    name: String,
    token: u64,
}

impl RegistrationHandle {
    /// Creates a handle. Called by registry adapters.
    #[must_use]
    pub fn new(name: impl Into<String>, token: u64) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    /// Returns the qualified name or key the handle was issued for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the adapter-specific token.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }
}

/// A qualified name or resource key is already registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("capability '{0}' is already registered")]
pub struct RegistrationConflict(pub String);

/// Tool publication request.
#[derive(Clone)]
pub struct ToolRegistration {
    /// Host-facing name.
    pub qualified_name: String,
    /// Owning server.
    pub server_id: ServerId,
    /// Owning server display name.
    pub server_name: ServerName,
    /// Tool metadata as reported by the server.
    pub definition: ToolDefinition,
    /// Forwards invocations to the server.
    pub invoker: Arc<dyn ToolInvoker>,
}

impl fmt::Debug for ToolRegistration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ToolRegistration")
            .field("qualified_name", &self.qualified_name)
            .field("server_id", &self.server_id)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Resource publication request.
#[derive(Clone)]
pub struct ResourceRegistration {
    /// Host-facing key.
    pub key: String,
    /// Owning server.
    pub server_id: ServerId,
    /// Resource metadata as reported by the server.
    pub definition: ResourceDefinition,
    /// Reads the resource body from the server.
    pub reader: Arc<dyn ResourceReader>,
}

impl fmt::Debug for ResourceRegistration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ResourceRegistration")
            .field("key", &self.key)
            .field("server_id", &self.server_id)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Forwards a host tool invocation to the owning server.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes the tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolInvocationError`] when the call fails or is cancelled.
    async fn invoke(
        &self,
        arguments: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ToolOutput, ToolInvocationError>;
}

/// Reads a resource body from the owning server.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    /// Reads the resource. `None` when the server does not support reads.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceReadError`] when the read fails.
    async fn read(&self) -> Result<Option<Vec<ResourceContents>>, ResourceReadError>;
}

/// One part of a tool result in host representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPart {
    /// Plain text.
    Text(String),
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Base64 audio.
    Audio {
        /// Base64 payload.
        data: String,
        /// MIME type.
        mime_type: String,
    },
    /// Embedded resource body.
    Resource(ResourceContents),
}

/// Tool result in host representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Never empty.
    pub parts: Vec<OutputPart>,
    /// Whether the server flagged the call as failed.
    pub is_error: bool,
}

impl ToolOutput {
    /// Returns the concatenated text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                OutputPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single tool invocation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolInvocationError {
    /// The server call failed.
    #[error("tool '{tool}' failed: {message}")]
    Failed {
        /// Tool name as reported by the server.
        tool: String,
        /// Underlying failure message.
        message: String,
    },

    /// The caller cancelled the invocation.
    #[error("tool '{tool}' was cancelled")]
    Cancelled {
        /// Tool name as reported by the server.
        tool: String,
    },
}

/// A resource read failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reading resource '{uri}' failed: {message}")]
pub struct ResourceReadError {
    /// Resource URI.
    pub uri: String,
    /// Underlying failure message.
    pub message: String,
}
