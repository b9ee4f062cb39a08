//! Newline-delimited JSON-RPC over a child's standard streams.

use super::jsonrpc::{IncomingMessage, OutgoingMessage, empty_reply};
use crate::mcp_bridge::ports::{ProtocolError, ProtocolTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = HashMap<u64, oneshot::Sender<IncomingMessage>>;

struct Shared {
    writer: tokio::sync::Mutex<Writer>,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
    label: String,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the channel closed; dropping the senders wakes every waiter.
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending().clear();
    }

    async fn write_line(&self, line: &str) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        written.map_err(|err| {
            self.mark_closed();
            ProtocolError::transport(err)
        })
    }
}

/// JSON-RPC transport over a pair of byte streams.
///
/// A reader task routes responses to waiting requests by id, answers server
/// `ping` requests and skips lines that are not JSON.
pub struct StdioTransport {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: AbortHandle,
}

impl StdioTransport {
    /// Starts the reader task and returns the transport.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start<R, W>(reader: R, writer: W, label: impl Into<String>, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            label: label.into(),
        });
        let task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        Self {
            shared,
            next_id: AtomicU64::new(1),
            timeout,
            reader: task.abort_handle(),
        }
    }

    /// Returns whether the channel was closed by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => route_line(&shared, line.trim()).await,
            Ok(None) => {
                debug!(server = %shared.label, "server output closed");
                break;
            }
            Err(err) => {
                warn!(server = %shared.label, error = %err, "failed reading server output");
                break;
            }
        }
    }
    shared.mark_closed();
}

async fn route_line(shared: &Shared, line: &str) {
    if line.is_empty() {
        return;
    }
    let message = match serde_json::from_str::<IncomingMessage>(line) {
        Ok(message) => message,
        Err(err) => {
            debug!(server = %shared.label, line, error = %err, "skipping non-JSON-RPC line");
            return;
        }
    };

    if message.is_ping() {
        if let Some(id) = &message.id {
            let reply = empty_reply(id).to_string();
            if let Err(err) = shared.write_line(&reply).await {
                warn!(server = %shared.label, error = %err, "failed to answer ping");
            }
        }
        return;
    }

    let Some(id) = message.response_id() else {
        debug!(server = %shared.label, method = ?message.method, "ignoring server message");
        return;
    };
    let waiter = shared.pending().remove(&id);
    match waiter {
        Some(sender) => {
            if sender.send(message).is_err() {
                debug!(server = %shared.label, id, "response arrived after caller gave up");
            }
        }
        None => debug!(server = %shared.label, id, "response for unknown request"),
    }
}

#[async_trait]
impl ProtocolTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let encoded = serde_json::to_string(&OutgoingMessage::request(id, method, params))
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;

        let (sender, receiver) = oneshot::channel();
        self.shared.pending().insert(id, sender);
        if let Err(err) = self.shared.write_line(&encoded).await {
            self.shared.pending().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(message)) => message.into_outcome(method),
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                self.shared.pending().remove(&id);
                Err(ProtocolError::Timeout {
                    method: method.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let encoded = serde_json::to_string(&OutgoingMessage::notification(method, params))
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        self.shared.write_line(&encoded).await
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader.abort();
        self.shared.pending().clear();
        let mut writer = self.shared.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            debug!(server = %self.shared.label, error = %err, "closing server input failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    fn transport_pair(timeout: Duration) -> (StdioTransport, DuplexStream) {
        let (client, server) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        (
            StdioTransport::start(read_half, write_half, "test", timeout),
            server,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn responses_are_routed_by_id() {
        let (transport, server) = transport_pair(DEFAULT_REQUEST_TIMEOUT);
        let (server_read, mut server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).expect("request is JSON");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": { "echo": request["method"] }
                });
                server_write
                    .write_all(format!("not json\n{reply}\n").as_bytes())
                    .await
                    .expect("reply is written");
            }
        });

        let result = transport
            .request("tools/list", None)
            .await
            .expect("request should succeed");
        assert_eq!(result, json!({ "echo": "tools/list" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_ping_is_answered() {
        let (_transport, server) = transport_pair(DEFAULT_REQUEST_TIMEOUT);
        let (server_read, mut server_write) = tokio::io::split(server);
        server_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"p1\",\"method\":\"ping\"}\n")
            .await
            .expect("ping is written");

        let mut lines = BufReader::new(server_read).lines();
        let reply = lines
            .next_line()
            .await
            .expect("reply is readable")
            .expect("reply line exists");
        let decoded: Value = serde_json::from_str(&reply).expect("reply is JSON");
        assert_eq!(decoded["id"], json!("p1"));
        assert_eq!(decoded["result"], json!({}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn silent_server_times_out() {
        let (transport, _server) = transport_pair(Duration::from_millis(50));
        let error = transport
            .request("initialize", None)
            .await
            .expect_err("request should time out");
        assert!(matches!(error, ProtocolError::Timeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_output_fails_requests() {
        let (transport, server) = transport_pair(DEFAULT_REQUEST_TIMEOUT);
        drop(server);
        let error = transport
            .request("tools/list", None)
            .await
            .expect_err("request should fail");
        assert!(error.is_connection_loss());
    }
}
