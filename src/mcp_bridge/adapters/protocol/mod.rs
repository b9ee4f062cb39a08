//! JSON-RPC transports spoken to real tool servers.

mod http;
mod jsonrpc;
mod stdio;

pub use http::{HttpConnector, HttpTransport, SESSION_HEADER};
pub use stdio::{DEFAULT_REQUEST_TIMEOUT, StdioTransport};
