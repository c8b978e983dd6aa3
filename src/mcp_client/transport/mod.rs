//! JSON-RPC transports to MCP servers.
//!
//! [`Transport`] gives the connection layer one request/notify/close surface
//! over the three wire protocols a server may speak.

mod http;
mod sse;
mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcResponse, ServerConfig, TransportKind};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Attach configured extra headers to an HTTP request.
fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    for (key, value) in headers {
        builder = builder.header(key, value);
    }
    builder
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// A live transport to one server.
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    Http(HttpTransport),
}

impl Transport {
    /// Open the transport selected by `config.kind`.
    ///
    /// `sse` and `http` require `url`; `stdio` requires `command`.
    pub async fn open(server_name: &str, config: &ServerConfig) -> Result<Self, McpError> {
        match config.kind {
            TransportKind::Stdio => {
                let command = config.command.as_deref().ok_or_else(|| McpError::ConfigError {
                    reason: format!("server '{server_name}' requires 'command' for stdio transport"),
                })?;
                StdioTransport::spawn(server_name, command, &config.args, &config.env)
                    .map(Transport::Stdio)
            }
            TransportKind::Sse => {
                let url = require_url(server_name, config, "sse")?;
                SseTransport::connect(server_name, url, &config.headers)
                    .await
                    .map(Transport::Sse)
            }
            TransportKind::Http => {
                let url = require_url(server_name, config, "http")?;
                HttpTransport::new(server_name, url, &config.headers).map(Transport::Http)
            }
        }
    }

    /// Send a request and return its `result`, converting JSON-RPC errors.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let response = match self {
            Transport::Stdio(t) => t.request(method, params).await?,
            Transport::Sse(t) => t.request(method, params).await?,
            Transport::Http(t) => t.request(method, params).await?,
        };
        extract_result(response)
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Sse(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
        }
    }

    pub async fn close(&self) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Sse(t) => t.close().await,
            Transport::Http(t) => t.close().await,
        }
    }

    /// Whether the underlying process or stream is still up. Streamable
    /// HTTP has no persistent channel and is always considered alive.
    pub fn is_alive(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_alive(),
            Transport::Sse(t) => t.is_alive(),
            Transport::Http(_) => true,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Sse(_) => TransportKind::Sse,
            Transport::Http(_) => TransportKind::Http,
        }
    }
}

fn require_url<'a>(
    server_name: &str,
    config: &'a ServerConfig,
    kind: &str,
) -> Result<&'a str, McpError> {
    config.url.as_deref().ok_or_else(|| McpError::ConfigError {
        reason: format!("server '{server_name}' requires 'url' for {kind} transport"),
    })
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

/// Minimal HTTP plumbing for the fake servers in the transport tests.
#[cfg(test)]
pub(crate) mod test_support {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    /// Read one request: its head (request line and headers) and a body of
    /// `Content-Length` bytes. Returns an empty head if the peer hung up.
    pub(crate) async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return (String::new(), Vec::new());
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
            let length = head
                .to_lowercase()
                .lines()
                .find_map(|l| l.strip_prefix("content-length:").map(str::to_string))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if buf.len() >= body_start + length {
                return (head, buf[body_start..body_start + length].to_vec());
            }
        }
    }
}
