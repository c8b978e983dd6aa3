//! Agent Core: the tool-calling conversation loop.
//!
//! Submodules:
//! - `orchestrator`: Streaming completion loop driving turns until a final answer
//! - `dispatcher`: Routes tool calls to MCP servers or built-in tools
//! - `conversation`: System prompt presets, message building, history trimming
//! - `credentials`: Provider API key lookup seam
//! - `events`: Events streamed to the caller
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod credentials;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod orchestrator;

// Re-exports for convenience
pub use conversation::{HistoryMessage, Prompt, PromptBlock, SystemPrompt};
pub use credentials::{CredentialStore, EnvCredentials, StaticCredentials};
pub use dispatcher::ToolDispatcher;
pub use errors::AgentError;
pub use events::{AgentEvent, AssistantContent};
pub use orchestrator::{Orchestrator, OrchestratorSettings, QueryOptions};
