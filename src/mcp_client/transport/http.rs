//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is a `POST` to the server URL. The server answers
//! with either a plain JSON body or an SSE body carrying the response. A
//! session id handed out on `initialize` (`Mcp-Session-Id`) is echoed on
//! every later request.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::super::errors::McpError;
use super::super::types::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{apply_headers, next_request_id};
use crate::inference::sse::SseDecoder;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// JSON-RPC transport over streamable HTTP.
pub struct HttpTransport {
    server_name: String,
    http: HttpClient,
    url: reqwest::Url,
    headers: HashMap<String, String>,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(
        server_name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let url = reqwest::Url::parse(url).map_err(|e| McpError::ConfigError {
            reason: format!("invalid url for server '{server_name}': {e}"),
        })?;

        Ok(Self {
            server_name: server_name.to_string(),
            http: HttpClient::new(),
            url,
            headers: headers.clone(),
            session_id: Mutex::new(None),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn builder(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = apply_headers(self.http.request(method, self.url.clone()), &self.headers);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<reqwest::Response, McpError> {
        let response = self
            .builder(reqwest::Method::POST)
            .header("Accept", "application/json, text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("request failed: {e}")))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {}: {body}", status.as_u16())));
        }
        Ok(response)
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            return self.read_event_stream(response, id).await;
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;
        match parse_response(&text) {
            Some(resp) if resp.id == id => Ok(resp),
            _ => Err(self.transport_error(format!("unexpected response body: {text}"))),
        }
    }

    /// Read an SSE response body until the message answering `id` arrives.
    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut decoder = SseDecoder::new();
        let mut body = Box::pin(response.bytes_stream());

        while let Some(chunk) = body.next().await {
            let bytes =
                chunk.map_err(|e| self.transport_error(format!("stream read error: {e}")))?;
            for event in decoder.feed(&bytes) {
                if let Some(resp) = parse_response(&event.data).filter(|r| r.id == id) {
                    return Ok(resp);
                }
            }
        }
        for event in decoder.finish() {
            if let Some(resp) = parse_response(&event.data).filter(|r| r.id == id) {
                return Ok(resp);
            }
        }

        Err(McpError::ConnectionClosed {
            name: self.server_name.clone(),
            reason: "response stream ended without a result".into(),
        })
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    /// Terminate the session, if the server issued one. Best-effort.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.session_id().is_none() {
            return Ok(());
        }
        self.builder(reqwest::Method::DELETE)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to end session: {e}")))?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::super::test_support::read_request;

    /// Streamable HTTP server. `initialize` gets a JSON body and a session
    /// id; other requests get an SSE body whose answer follows an unrelated
    /// notification. Request heads are recorded lowercased.
    async fn start_server() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let heads = Arc::new(Mutex::new(Vec::new()));
        let recorded = heads.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let (head, body) = read_request(&mut socket).await;
                recorded.lock().unwrap().push(head.to_lowercase());

                let request: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
                let method = request["method"].as_str().unwrap_or("").to_string();
                let reply = |id: &serde_json::Value| {
                    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"method": method}})
                        .to_string()
                };

                let response = match request.get("id") {
                    _ if head.starts_with("DELETE") => {
                        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    }
                    None => "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_string(),
                    Some(id) if method == "initialize" => {
                        let body = reply(id);
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nMcp-Session-Id: sess-42\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        )
                    }
                    Some(id) => {
                        let body = format!(
                            "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}}\n\nevent: message\ndata: {}\n\n",
                            reply(id)
                        );
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        )
                    }
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/mcp"), heads)
    }

    #[tokio::test]
    async fn test_json_and_event_stream_bodies_with_session_echo() {
        let (url, heads) = start_server().await;
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "k1".to_string());
        let transport = HttpTransport::new("remote", &url, &headers).unwrap();

        let init = transport.request("initialize", None).await.unwrap();
        assert_eq!(init.result.unwrap()["method"], "initialize");
        transport.notify("notifications/initialized", None).await.unwrap();
        let list = transport.request("tools/list", None).await.unwrap();
        assert_eq!(list.result.unwrap()["method"], "tools/list");
        transport.close().await.unwrap();

        let heads = heads.lock().unwrap().clone();
        assert_eq!(heads.len(), 4);
        assert!(heads.iter().all(|h| h.contains("x-api-key: k1")));
        assert!(!heads[0].contains("mcp-session-id"));
        assert!(heads[1..].iter().all(|h| h.contains("mcp-session-id: sess-42")));
        assert!(heads[3].starts_with("delete /mcp"));
    }

    #[tokio::test]
    async fn test_close_without_session_sends_nothing() {
        let (url, heads) = start_server().await;
        let transport = HttpTransport::new("remote", &url, &HashMap::new()).unwrap();
        transport.close().await.unwrap();
        assert!(heads.lock().unwrap().is_empty());
    }
}
