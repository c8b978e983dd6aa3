//! MCP client: plugin servers reached over stdio, SSE or streamable HTTP.
//!
//! This module handles:
//! - Opening transports and running the MCP initialize handshake
//! - Tool discovery and aggregation across all connected servers
//! - Deduplicated, concurrent connects keyed by server name
//! - Tool call routing with per-call timeouts
//!
//! The [`ConnectionManager`] is used by the tool dispatcher to route calls
//! for tools that no built-in handles.

pub mod connection;
pub mod errors;
pub mod manager;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use connection::{McpTimeouts, PluginConnection};
pub use errors::McpError;
pub use manager::ConnectionManager;
pub use types::{ServerConfig, ToolDescriptor, TransportKind};
