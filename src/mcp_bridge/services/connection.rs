//! Resilient protocol session with one tool server.
//!
//! A [`ProtocolClientConnection`] owns the transport connector for one server
//! and hides retries and lazy reconnection from its callers. At most one
//! connect attempt is in flight per connection: concurrent callers await the
//! same shared future.

use crate::mcp_bridge::domain::{
    ConnectionStatus, ResourceContents, ResourceDefinition, ServerId, ServerName, ToolCallResult,
    ToolDefinition,
};
use crate::mcp_bridge::ports::{ProtocolError, ProtocolTransport, TransportConnector};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced during `initialize`.
const CLIENT_NAME: &str = "switchboard";

/// Upper bound on followed `nextCursor` pages per listing.
const MAX_LIST_PAGES: usize = 64;

/// Retry policy for connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Connect failures.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Every attempt failed.
    #[error("could not connect to '{server}' after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Server display name.
        server: String,
        /// Attempts performed.
        attempts: u32,
        /// Cause of the final failure.
        last: ProtocolError,
    },

    /// The connection was disposed.
    #[error("connection to '{0}' was disposed")]
    Disposed(String),
}

/// Failures of a call or read on a live session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// No session could be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The server rejected or failed the request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Returns whether the server reported the method as unknown.
    #[must_use]
    pub const fn is_method_not_supported(&self) -> bool {
        matches!(self, Self::Protocol(error) if error.is_method_not_supported())
    }
}

/// Identity reported by the server during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    /// Server implementation name.
    #[serde(default)]
    pub name: String,
    /// Server implementation version.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    protocol_version: String,
    #[serde(default)]
    capabilities: Value,
    #[serde(default)]
    server_info: ServerInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourcesPage {
    #[serde(default)]
    resources: Vec<ResourceDefinition>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceResult {
    #[serde(default)]
    contents: Vec<ResourceContents>,
}

/// An initialized protocol client.
pub struct ClientHandle {
    transport: Arc<dyn ProtocolTransport>,
    protocol_version: String,
    capabilities: Value,
    server_info: ServerInfo,
}

impl ClientHandle {
    /// Returns the protocol revision the server agreed to.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Returns the raw server capabilities object.
    #[must_use]
    pub const fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    /// Returns the server identity.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientHandle")
            .field("protocol_version", &self.protocol_version)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

type ConnectResult = Result<Arc<ClientHandle>, ConnectionError>;
type SharedConnect = Shared<BoxFuture<'static, ConnectResult>>;

#[derive(Default)]
struct ConnectionState {
    status: ConnectionStatus,
    client: Option<Arc<ClientHandle>>,
    in_flight: Option<SharedConnect>,
    disposed: bool,
}

/// Resilient single-server protocol session.
pub struct ProtocolClientConnection {
    server_id: ServerId,
    server_name: ServerName,
    connector: Arc<dyn TransportConnector>,
    settings: ConnectionSettings,
    state: Arc<Mutex<ConnectionState>>,
}

impl fmt::Debug for ProtocolClientConnection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProtocolClientConnection")
            .field("server_id", &self.server_id)
            .field("server_name", &self.server_name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn lock_state(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProtocolClientConnection {
    /// Creates a disconnected connection.
    #[must_use]
    pub fn new(
        server_id: ServerId,
        server_name: ServerName,
        connector: Arc<dyn TransportConnector>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            server_id,
            server_name,
            connector,
            settings,
            state: Arc::new(Mutex::new(ConnectionState::default())),
        }
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Returns the server display name.
    #[must_use]
    pub const fn server_name(&self) -> &ServerName {
        &self.server_name
    }

    /// Returns the current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        lock_state(&self.state).status
    }

    /// Returns whether `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock_state(&self.state).disposed
    }

    /// Connects using the configured retry count.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`].
    pub async fn connect_default(&self) -> Result<Arc<ClientHandle>, ConnectionError> {
        self.connect(self.settings.retries).await
    }

    /// Establishes the session, retrying up to `retries_remaining` times
    /// with a fixed delay.
    ///
    /// Returns the live client when already connected. While an attempt is in
    /// flight, every caller awaits that same attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Exhausted`] once every attempt failed and
    /// [`ConnectionError::Disposed`] after `dispose`.
    pub async fn connect(
        &self,
        retries_remaining: u32,
    ) -> Result<Arc<ClientHandle>, ConnectionError> {
        let attempt = {
            let mut state = lock_state(&self.state);
            if state.disposed {
                return Err(self.disposed_error());
            }
            if let Some(client) = &state.client {
                return Ok(Arc::clone(client));
            }
            if let Some(in_flight) = &state.in_flight {
                in_flight.clone()
            } else {
                let attempt = establish(
                    Arc::clone(&self.connector),
                    Arc::clone(&self.state),
                    self.server_id,
                    self.server_name.clone(),
                    retries_remaining,
                    self.settings.retry_delay,
                )
                .boxed()
                .shared();
                state.status = ConnectionStatus::Connecting;
                state.in_flight = Some(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    /// Lists every tool, following pagination.
    ///
    /// Reconnects lazily. Failures are logged and yield an empty list.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        match self.try_list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                warn!(
                    server_id = %self.server_id,
                    server = %self.server_name,
                    error = %err,
                    "listing tools failed"
                );
                Vec::new()
            }
        }
    }

    /// Lists every resource, following pagination.
    ///
    /// Reconnects lazily. A server without resource support yields an empty
    /// list; other failures are logged and also yield an empty list.
    pub async fn list_resources(&self) -> Vec<ResourceDefinition> {
        match self.try_list_resources().await {
            Ok(resources) => resources,
            Err(err) if err.is_method_not_supported() => {
                debug!(
                    server_id = %self.server_id,
                    server = %self.server_name,
                    "server does not support resources"
                );
                Vec::new()
            }
            Err(err) => {
                warn!(
                    server_id = %self.server_id,
                    server = %self.server_name,
                    error = %err,
                    "listing resources failed"
                );
                Vec::new()
            }
        }
    }

    /// Calls a tool with verbatim arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when no session can be established or the
    /// server fails the call.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallResult, SessionError> {
        let client = self.ensure_connected().await?;
        let params = json!({ "name": name, "arguments": arguments });
        self.request_as(&client, "tools/call", Some(params)).await
    }

    /// Reads a resource body. `None` when the server does not support reads.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when no session can be established or the
    /// server fails the read.
    pub async fn read_resource(
        &self,
        uri: &str,
    ) -> Result<Option<Vec<ResourceContents>>, SessionError> {
        let client = self.ensure_connected().await?;
        let params = json!({ "uri": uri });
        match self
            .request_as::<ReadResourceResult>(&client, "resources/read", Some(params))
            .await
        {
            Ok(result) => Ok(Some(result.contents)),
            Err(err) if err.is_method_not_supported() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Releases the client and closes the client side of the transport.
    ///
    /// Subsequent calls fail with [`ConnectionError::Disposed`]. Idempotent.
    pub async fn dispose(&self) {
        let client = {
            let mut state = lock_state(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.in_flight = None;
            state.status = ConnectionStatus::Disconnected;
            state.client.take()
        };
        if let Some(active) = client {
            active.transport.close().await;
        }
        debug!(server_id = %self.server_id, server = %self.server_name, "connection disposed");
    }

    async fn ensure_connected(&self) -> Result<Arc<ClientHandle>, ConnectionError> {
        self.connect(self.settings.retries).await
    }

    async fn try_list_tools(&self) -> Result<Vec<ToolDefinition>, SessionError> {
        let client = self.ensure_connected().await?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|value| json!({ "cursor": value }));
            let page: ToolsPage = self.request_as(&client, "tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn try_list_resources(&self) -> Result<Vec<ResourceDefinition>, SessionError> {
        let client = self.ensure_connected().await?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|value| json!({ "cursor": value }));
            let page: ResourcesPage = self.request_as(&client, "resources/list", params).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(resources)
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        client: &Arc<ClientHandle>,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, SessionError> {
        let value = match client.transport.request(method, params).await {
            Ok(value) => value,
            Err(err) => {
                if err.is_connection_loss() {
                    self.mark_disconnected(client);
                }
                return Err(err.into());
            }
        };
        serde_json::from_value(value)
            .map_err(|err| ProtocolError::Malformed(format!("{method}: {err}")).into())
    }

    fn mark_disconnected(&self, client: &Arc<ClientHandle>) {
        let mut state = lock_state(&self.state);
        let is_current = state
            .client
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, client));
        if is_current {
            state.client = None;
            state.status = ConnectionStatus::Disconnected;
            info!(
                server_id = %self.server_id,
                server = %self.server_name,
                "transport lost; will reconnect on next use"
            );
        }
    }

    fn disposed_error(&self) -> ConnectionError {
        ConnectionError::Disposed(self.server_name.to_string())
    }
}

async fn establish(
    connector: Arc<dyn TransportConnector>,
    state: Arc<Mutex<ConnectionState>>,
    server_id: ServerId,
    server_name: ServerName,
    retries: u32,
    retry_delay: Duration,
) -> ConnectResult {
    let max_attempts = retries.saturating_add(1);
    let mut attempt = 0;
    let mut retained = None;
    let outcome = loop {
        attempt += 1;
        match attempt_handshake(connector.as_ref(), &mut retained).await {
            Ok(client) => break Ok(Arc::new(client)),
            Err(err) => {
                warn!(
                    server_id = %server_id,
                    server = %server_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "connect attempt failed"
                );
                if attempt >= max_attempts {
                    break Err(err);
                }
                tokio::time::sleep(retry_delay).await;
            }
        }
    };
    if let Some(stale) = retained.take() {
        stale.close().await;
    }

    let orphaned = {
        let mut guard = lock_state(&state);
        guard.in_flight = None;
        match &outcome {
            Ok(client) if guard.disposed => Some(Arc::clone(client)),
            Ok(client) => {
                guard.status = ConnectionStatus::Connected;
                guard.client = Some(Arc::clone(client));
                None
            }
            Err(_) => {
                if !guard.disposed {
                    guard.status = ConnectionStatus::Failed;
                }
                None
            }
        }
    };
    if let Some(client) = orphaned {
        client.transport.close().await;
        return Err(ConnectionError::Disposed(server_name.to_string()));
    }

    match outcome {
        Ok(client) => {
            info!(
                server_id = %server_id,
                server = %server_name,
                protocol_version = %client.protocol_version,
                remote = %client.server_info.name,
                "connected"
            );
            Ok(client)
        }
        Err(last) => Err(ConnectionError::Exhausted {
            server: server_name.to_string(),
            attempts: attempt,
            last,
        }),
    }
}

/// Runs one handshake. A failure that leaves the channel usable hands the
/// transport back through `retained` so the next attempt re-sends
/// `initialize` on it instead of opening another.
async fn attempt_handshake(
    connector: &dyn TransportConnector,
    retained: &mut Option<Arc<dyn ProtocolTransport>>,
) -> Result<ClientHandle, ProtocolError> {
    let transport = match retained.take() {
        Some(open) => open,
        None => connector.open().await?,
    };
    match handshake(transport.as_ref()).await {
        Ok(result) => Ok(ClientHandle {
            transport,
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            server_info: result.server_info,
        }),
        Err(err) => {
            if err.is_connection_loss() {
                transport.close().await;
            } else {
                *retained = Some(transport);
            }
            Err(err)
        }
    }
}

async fn handshake(transport: &dyn ProtocolTransport) -> Result<InitializeResult, ProtocolError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let value = transport.request("initialize", Some(params)).await?;
    let result = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| ProtocolError::Malformed(format!("initialize: {err}")))?;
    transport.notify("notifications/initialized", None).await?;
    Ok(result)
}
