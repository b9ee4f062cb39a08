//! Protocol transport port.
//!
//! A transport carries JSON-RPC requests and notifications to one tool
//! server. Connectors open fresh transports so a connection can reconnect
//! without knowing whether it speaks to a child process or an HTTP endpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// One open JSON-RPC channel to a tool server.
#[async_trait]
pub trait ProtocolTransport: Send + Sync {
    /// Sends a request and waits for its response `result`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for error responses, timeouts and transport
    /// failures.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError>;

    /// Sends a notification without waiting for a response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the message cannot be delivered.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError>;

    /// Closes the client side of the channel. Safe to call more than once.
    async fn close(&self);
}

/// Opens transports to one tool server.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a new transport.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the server cannot be reached.
    async fn open(&self) -> Result<Arc<dyn ProtocolTransport>, ProtocolError>;
}

/// Errors produced while speaking JSON-RPC to a tool server.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The server does not implement the method.
    #[error("method not supported: {method}")]
    MethodNotSupported {
        /// Requested method.
        method: String,
    },

    /// The server answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// The transport was closed.
    #[error("transport closed")]
    Closed,

    /// No response arrived in time.
    #[error("request '{method}' timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Requested method.
        method: String,
        /// Elapsed timeout.
        timeout: Duration,
    },

    /// I/O or HTTP failure.
    #[error("transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Wraps an I/O or HTTP failure.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }

    /// Builds an error from a JSON-RPC error object.
    #[must_use]
    pub fn from_rpc(method: &str, code: i64, message: impl Into<String>) -> Self {
        if code == METHOD_NOT_FOUND {
            return Self::MethodNotSupported {
                method: method.to_owned(),
            };
        }
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Returns whether the server reported the method as unknown.
    #[must_use]
    pub const fn is_method_not_supported(&self) -> bool {
        matches!(self, Self::MethodNotSupported { .. })
    }

    /// Returns whether the channel is unusable after this error.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Closed | Self::Transport(_))
    }
}
