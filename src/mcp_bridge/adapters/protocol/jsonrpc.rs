//! JSON-RPC 2.0 message types shared by the stdio and HTTP transports.

use crate::mcp_bridge::ports::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const VERSION: &str = "2.0";

/// Outgoing request or notification. Notifications carry no id.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> OutgoingMessage<'a> {
    /// Builds a request expecting a response with `id`.
    #[must_use]
    pub const fn request(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    /// Builds a notification.
    #[must_use]
    pub const fn notification(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id: None,
            method,
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Any message a server may send: a response, a request or a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Numeric or string id; absent on notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Present on server requests and notifications.
    #[serde(default)]
    pub method: Option<String>,
    /// Successful response payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failed response payload.
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl IncomingMessage {
    /// Returns the id of a response to one of our requests.
    #[must_use]
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Returns whether this is a server `ping` request.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.id.is_some() && self.method.as_deref() == Some("ping")
    }

    /// Converts a response into the request outcome.
    ///
    /// # Errors
    ///
    /// Returns the server's error mapped through [`ProtocolError::from_rpc`].
    pub fn into_outcome(self, method: &str) -> Result<Value, ProtocolError> {
        if let Some(error) = self.error {
            return Err(ProtocolError::from_rpc(method, error.code, error.message));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Empty-result reply to a server request such as `ping`.
#[must_use]
pub fn empty_reply(id: &Value) -> Value {
    serde_json::json!({ "jsonrpc": VERSION, "id": id, "result": {} })
}
