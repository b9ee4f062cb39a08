//! Streamable HTTP transport for stream tool servers.

use super::jsonrpc::{IncomingMessage, OutgoingMessage};
use crate::mcp_bridge::{
    domain::StreamEndpoint,
    ports::{ProtocolError, ProtocolTransport, TransportConnector},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Session header assigned by the server on `initialize`.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const JSON_MIME_TYPE: &str = "application/json";
const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";

/// Opens HTTP sessions against one endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    endpoint: StreamEndpoint,
    timeout: Duration,
}

impl HttpConnector {
    /// Creates a connector sharing `client`'s connection pool.
    #[must_use]
    pub const fn new(client: reqwest::Client, endpoint: StreamEndpoint, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl TransportConnector for HttpConnector {
    async fn open(&self) -> Result<Arc<dyn ProtocolTransport>, ProtocolError> {
        Ok(Arc::new(HttpTransport {
            client: self.client.clone(),
            url: self.endpoint.endpoint_url().to_owned(),
            auth_token: self.endpoint.auth_token().map(str::to_owned),
            timeout: self.timeout,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One HTTP session. Every message is a POST; the server answers with JSON
/// or a short event stream.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpTransport {
    fn session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_session(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(value.to_owned());
        }
    }

    fn post(&self, body: String) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(ACCEPT, format!("{JSON_MIME_TYPE}, {EVENT_STREAM_MIME_TYPE}"))
            .header(CONTENT_TYPE, JSON_MIME_TYPE)
            .body(body);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(session) = self.session() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }

    fn map_send_error(&self, method: &str, err: reqwest::Error) -> ProtocolError {
        if err.is_timeout() {
            return ProtocolError::Timeout {
                method: method.to_owned(),
                timeout: self.timeout,
            };
        }
        ProtocolError::transport(err)
    }
}

#[async_trait]
impl ProtocolTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&OutgoingMessage::request(id, method, params))
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;

        let sent = self
            .post(body)
            .send()
            .await
            .map_err(|err| self.map_send_error(method, err))?;
        self.remember_session(sent.headers());
        let response = sent.error_for_status().map_err(ProtocolError::transport)?;
        if response.status() == StatusCode::ACCEPTED {
            return Err(ProtocolError::Malformed(format!(
                "{method}: server accepted the request without a response"
            )));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(EVENT_STREAM_MIME_TYPE));
        let text = response
            .text()
            .await
            .map_err(|err| self.map_send_error(method, err))?;

        let message = if is_event_stream {
            find_response(&sse_payloads(&text), id)
                .ok_or_else(|| ProtocolError::Malformed(format!("{method}: no response event")))?
        } else {
            serde_json::from_str::<IncomingMessage>(&text)
                .map_err(|err| ProtocolError::Malformed(format!("{method}: {err}")))?
        };
        message.into_outcome(method)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let body = serde_json::to_string(&OutgoingMessage::notification(method, params))
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        let response = self
            .post(body)
            .send()
            .await
            .map_err(|err| self.map_send_error(method, err))?;
        self.remember_session(response.headers());
        response
            .error_for_status()
            .map(drop)
            .map_err(ProtocolError::transport)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(session) = self.session() else {
            return;
        };
        let mut builder = self
            .client
            .delete(&self.url)
            .timeout(self.timeout)
            .header(SESSION_HEADER, session);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        match builder.send().await {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {}
            Ok(response) => {
                if let Err(err) = response.error_for_status() {
                    debug!(url = %self.url, error = %err, "session delete rejected");
                }
            }
            Err(err) => debug!(url = %self.url, error = %err, "session delete failed"),
        }
    }
}

/// Extracts the `data` payloads of a server-sent event body.
fn sse_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

fn find_response(payloads: &[String], id: u64) -> Option<IncomingMessage> {
    payloads
        .iter()
        .filter_map(|payload| serde_json::from_str::<IncomingMessage>(payload).ok())
        .find(|message| message.response_id() == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer, token: Option<&str>) -> HttpConnector {
        let mut endpoint = StreamEndpoint::new(server.uri()).expect("mock uri is valid");
        if let Some(value) = token {
            endpoint = endpoint.with_auth_token(value);
        }
        HttpConnector::new(reqwest::Client::new(), endpoint, Duration::from_secs(5))
    }

    #[test]
    fn sse_payloads_join_data_lines() {
        let body = "event: message\ndata: {\"a\":\ndata: 1}\n\n: comment\ndata: two\n";
        assert_eq!(sse_payloads(body), vec!["{\"a\":\n1}".to_owned(), "two".to_owned()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn json_response_sets_session_for_later_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(SESSION_HEADER, "session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2, "result": { "tools": [] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, "session-1")
                    .set_body_json(json!({
                        "jsonrpc": "2.0", "id": 1, "result": { "protocolVersion": "2024-11-05" }
                    })),
            )
            .mount(&server)
            .await;

        let transport = connector(&server, Some("secret"))
            .open()
            .await
            .expect("open never touches the network");
        let initialized = transport
            .request("initialize", Some(json!({})))
            .await
            .expect("initialize should succeed");
        assert_eq!(initialized["protocolVersion"], json!("2024-11-05"));

        let listed = transport
            .request("tools/list", None)
            .await
            .expect("listing should reuse the session");
        assert_eq!(listed, json!({ "tools": [] }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn event_stream_response_is_decoded() {
        let server = MockServer::start().await;
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let transport = connector(&server, None).open().await.expect("open succeeds");
        let result = transport
            .request("ping", None)
            .await
            .expect("event stream response should decode");
        assert_eq!(result, json!({ "ok": true }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_errors_are_connection_losses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = connector(&server, None).open().await.expect("open succeeds");
        let error = transport
            .request("initialize", None)
            .await
            .expect_err("500 should fail");
        assert!(error.is_connection_loss());
    }
}
