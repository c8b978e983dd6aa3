//! Inference client: streaming OpenAI-compatible chat completions.
//!
//! This module handles all communication with the completion endpoint:
//! - Request building with tool schemas
//! - Incremental SSE decoding and tool-call fragment accumulation
//! - Transport retry with exponential backoff and per-attempt deadlines
//!
//! The client speaks the OpenAI Chat Completions API, so the provider is a
//! config change, not a code change.

pub mod client;
pub mod errors;
pub mod retry;
pub mod sse;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{CompletionClient, CompletionSettings, CompletionStream};
pub use errors::InferenceError;
pub use retry::RetryPolicy;
pub use streaming::StreamChunk;
pub use types::{ChatMessage, ContentPart, MessageContent, Role, ToolCallRef, ToolDefinition};
