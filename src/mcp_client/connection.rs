//! A connected MCP server: transport, handshake and tool catalog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{
    CallToolResult, InitializeResult, ListToolsResult, ServerConfig, ServerInfo, ToolDescriptor,
    PROTOCOL_VERSION,
};

// ─── Timeouts ────────────────────────────────────────────────────────────────

/// Independent deadlines for the phases of talking to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McpTimeouts {
    /// Transport establishment plus the `initialize` handshake.
    pub connect: Duration,
    /// `tools/list`, including all pages.
    pub list_tools: Duration,
    /// A single `tools/call`.
    pub call: Duration,
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            list_tools: Duration::from_secs(30),
            call: Duration::from_secs(60),
        }
    }
}

/// Safety valve against servers that return a cursor forever.
const MAX_TOOL_PAGES: usize = 100;

// ─── PluginConnection ────────────────────────────────────────────────────────

/// A server that completed the handshake and listed its tools.
pub struct PluginConnection {
    pub server_name: String,
    pub server_info: ServerInfo,
    pub tools: Vec<ToolDescriptor>,
    transport: Transport,
    /// Set when a request observed the server going away.
    lost: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for PluginConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConnection")
            .field("server_name", &self.server_name)
            .field("transport", &self.transport.kind())
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl PluginConnection {
    /// Open the transport, run the handshake, then list tools.
    ///
    /// The connect and list-tools phases each get their own timeout. On any
    /// failure the half-open transport is dropped, which tears it down.
    pub async fn establish(
        name: &str,
        config: &ServerConfig,
        timeouts: &McpTimeouts,
    ) -> Result<Self, McpError> {
        let connect = async {
            let transport = Transport::open(name, config).await?;
            let server_info = handshake(&transport, name).await?;
            Ok::<_, McpError>((transport, server_info))
        };
        let (transport, server_info) = tokio::time::timeout(timeouts.connect, connect)
            .await
            .map_err(|_| McpError::Timeout {
                server: name.to_string(),
                operation: "connect".into(),
                timeout_ms: timeouts.connect.as_millis() as u64,
            })??;

        let tools = match tokio::time::timeout(timeouts.list_tools, list_tools(&transport, name)).await
        {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                let _ = transport.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = transport.close().await;
                return Err(McpError::Timeout {
                    server: name.to_string(),
                    operation: "tools/list".into(),
                    timeout_ms: timeouts.list_tools.as_millis() as u64,
                });
            }
        };

        tracing::info!(
            server = name,
            transport = ?transport.kind(),
            tool_count = tools.len(),
            server_version = server_info.version.as_deref().unwrap_or("unknown"),
            "MCP server connected"
        );

        Ok(Self {
            server_name: name.to_string(),
            server_info,
            tools,
            transport,
            lost: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// False once the server exited, its stream ended, or it was closed.
    pub fn is_alive(&self) -> bool {
        !self.lost.load(Ordering::Acquire)
            && !self.closed.load(Ordering::Acquire)
            && self.transport.is_alive()
    }

    /// Whether this server exposes a tool called `name`.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Invoke `tools/call` with the given deadline.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = tokio::time::timeout(timeout, self.transport.request("tools/call", Some(params)))
            .await
            .map_err(|_| McpError::Timeout {
                server: self.server_name.clone(),
                operation: format!("tools/call '{name}'"),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .inspect_err(|e| {
                if matches!(e, McpError::ConnectionClosed { .. }) {
                    self.lost.store(true, Ordering::Release);
                }
            })?;

        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to parse tools/call result: {e}"),
        })
    }

    /// Tear down the transport. Later calls are no-ops.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.transport.close().await
    }
}

/// `initialize` request followed by the `notifications/initialized` notice.
async fn handshake(transport: &Transport, server_name: &str) -> Result<ServerInfo, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let result = transport
        .request("initialize", Some(params))
        .await
        .map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: e.to_string(),
        })?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    if let Some(version) = init.protocol_version.as_deref().filter(|v| *v != PROTOCOL_VERSION) {
        tracing::debug!(
            server = server_name,
            requested = PROTOCOL_VERSION,
            negotiated = version,
            "server negotiated a different protocol revision"
        );
    }

    transport.notify("notifications/initialized", None).await?;

    Ok(init.server_info.unwrap_or_default())
}

/// Fetch every page of `tools/list`.
async fn list_tools(transport: &Transport, server_name: &str) -> Result<Vec<ToolDescriptor>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let result = transport.request("tools/list", params).await?;
        let page: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: server_name.to_string(),
                reason: format!("failed to parse tools/list result: {e}"),
            })?;

        tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
            server_name: server_name.to_string(),
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        }));

        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(tools)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
