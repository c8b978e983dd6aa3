//! Built-in tools: file, search and shell primitives executed in-process.
//!
//! - `safety`: advisory deny-list screened before every shell command
//! - `input`: typed, validated inputs per tool
//! - `builtin`: the executor
//! - `definitions`: JSON schemas advertised to the model

pub mod builtin;
pub mod definitions;
pub mod input;
pub mod safety;
pub mod types;

pub use builtin::{BuiltinExecutor, BASH_TIMEOUT};
pub use definitions::builtin_tool_definitions;
pub use input::{BuiltinInput, InputError, BUILTIN_TOOL_NAMES};
pub use safety::{is_dangerous, SafetyVerdict, SAFETY_RULES};
pub use types::{ToolCall, ToolResult};
