//! MCP client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// I/O, HTTP or framing error on the transport.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No connected server exposes this tool.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// An operation exceeded its deadline.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The server went away (process exited, stream closed).
    #[error("connection to server '{name}' closed: {reason}")]
    ConnectionClosed {
        name: String,
        reason: String,
    },

    /// Invalid server configuration (missing url/command, bad type).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}
