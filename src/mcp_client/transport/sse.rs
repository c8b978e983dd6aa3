//! Legacy HTTP+SSE transport.
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL to `POST` JSON-RPC messages to; responses
//! come back asynchronously as `message` events on the stream and are routed
//! to the waiting request by `id`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use reqwest::Client as HttpClient;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::super::errors::McpError;
use super::super::types::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{apply_headers, next_request_id};
use crate::inference::sse::SseDecoder;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Removes a request's waiter when the request finishes or is dropped
/// (e.g. by a caller's timeout).
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

/// JSON-RPC transport over the legacy SSE protocol.
pub struct SseTransport {
    server_name: String,
    http: HttpClient,
    headers: HashMap<String, String>,
    post_url: reqwest::Url,
    pending: PendingMap,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(
        server_name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let transport_error = |reason: String| McpError::TransportError {
            server: server_name.to_string(),
            reason,
        };

        let base = reqwest::Url::parse(url)
            .map_err(|e| McpError::ConfigError {
                reason: format!("invalid url for server '{server_name}': {e}"),
            })?;

        let http = HttpClient::new();
        let response = apply_headers(http.get(base.clone()), headers)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(format!("failed to open event stream: {e}")))?;

        if !response.status().is_success() {
            return Err(transport_error(format!(
                "event stream returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let reader = tokio::spawn(read_events(
            server_name.to_string(),
            response,
            pending.clone(),
            endpoint_tx,
        ));

        let endpoint = match endpoint_rx.await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                reader.abort();
                return Err(McpError::ConnectionClosed {
                    name: server_name.to_string(),
                    reason: "event stream ended before the endpoint event".into(),
                });
            }
        };

        let post_url = match base.join(&endpoint) {
            Ok(u) => u,
            Err(e) => {
                reader.abort();
                return Err(transport_error(format!("invalid endpoint '{endpoint}': {e}")));
            }
        };

        tracing::info!(server = server_name, endpoint = %post_url, "SSE transport ready");

        Ok(Self {
            server_name: server_name.to_string(),
            http,
            headers: headers.clone(),
            post_url,
            pending,
            reader,
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<(), McpError> {
        let response = apply_headers(self.http.post(self.post_url.clone()), &self.headers)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to post message: {e}")))?;

        if !response.status().is_success() {
            return Err(self.transport_error(format!(
                "message endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Send a request and wait for its response on the event stream.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.post(&JsonRpcRequest::new(id, method, params)).await?;

        rx.await.map_err(|_| McpError::ConnectionClosed {
            name: self.server_name.clone(),
            reason: "event stream closed before the response arrived".into(),
        })
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    /// False once the event stream has ended.
    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Stop reading the event stream. Pending requests fail as closed.
    pub async fn close(&self) -> Result<(), McpError> {
        self.reader.abort();
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Background task: decode the event stream and route its events.
async fn read_events(
    server_name: String,
    response: reqwest::Response,
    pending: PendingMap,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut body = Box::pin(response.bytes_stream());

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "event stream read failed");
                break;
            }
        };

        for event in decoder.feed(&bytes) {
            match event.kind() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                }
                "message" => {
                    let Some(resp) = parse_response(&event.data) else {
                        continue;
                    };
                    let waiter = pending.lock().ok().and_then(|mut p| p.remove(&resp.id));
                    if let Some(tx) = waiter {
                        let _ = tx.send(resp);
                    }
                }
                other => {
                    tracing::debug!(server = %server_name, event = other, "ignoring SSE event");
                }
            }
        }
    }

    tracing::info!(server = %server_name, "event stream ended");
    // Dropping the senders fails every outstanding request.
    if let Ok(mut p) = pending.lock() {
        p.clear();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
