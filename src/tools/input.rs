//! Typed inputs for the built-in tools.
//!
//! Each tool's accepted field names, including aliases models commonly
//! produce (`file_path`, `old_string`, ...), are declared on its input
//! struct. Inputs are validated once, when the call is parsed.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// Names of all built-in tools, in the order they are advertised.
pub const BUILTIN_TOOL_NAMES: &[&str] = &["read", "write", "edit", "bash", "glob", "grep", "list"];

/// Errors produced while validating built-in tool input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("missing required field '{field}' for tool '{tool}'")]
    MissingField { tool: String, field: String },

    #[error("invalid input for tool '{tool}': {reason}")]
    Invalid { tool: String, reason: String },

    #[error("unknown built-in tool '{name}'")]
    UnknownTool { name: String },
}

// ─── Per-tool Inputs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadInput {
    #[serde(alias = "file_path", alias = "file")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteInput {
    #[serde(alias = "file_path", alias = "file")]
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EditInput {
    #[serde(alias = "file_path", alias = "file")]
    pub path: String,
    #[serde(alias = "old_string", alias = "old_str")]
    pub old: String,
    #[serde(alias = "new_string", alias = "new_str")]
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BashInput {
    #[serde(alias = "cmd")]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobInput {
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GrepInput {
    pub pattern: String,
    #[serde(default, alias = "directory", alias = "dir")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListInput {
    #[serde(default, alias = "directory", alias = "dir")]
    pub path: Option<String>,
}

/// A validated built-in tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinInput {
    Read(ReadInput),
    Write(WriteInput),
    Edit(EditInput),
    Bash(BashInput),
    Glob(GlobInput),
    Grep(GrepInput),
    List(ListInput),
}

impl BuiltinInput {
    /// Validate `input` against the shape expected by tool `name`.
    pub fn parse(
        name: &str,
        input: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, InputError> {
        match name {
            "read" => decode(name, input).map(Self::Read),
            "write" => decode(name, input).map(Self::Write),
            "edit" => decode(name, input).map(Self::Edit),
            "bash" => decode(name, input).map(Self::Bash),
            "glob" => decode(name, input).map(Self::Glob),
            "grep" => decode(name, input).map(Self::Grep),
            "list" => decode(name, input).map(Self::List),
            other => Err(InputError::UnknownTool {
                name: other.to_string(),
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(
    tool: &str,
    input: &serde_json::Map<String, serde_json::Value>,
) -> Result<T, InputError> {
    serde_json::from_value(serde_json::Value::Object(input.clone())).map_err(|e| {
        let message = e.to_string();
        match missing_field_name(&message) {
            Some(field) => InputError::MissingField {
                tool: tool.to_string(),
                field: field.to_string(),
            },
            None => InputError::Invalid {
                tool: tool.to_string(),
                reason: message,
            },
        }
    })
}

/// Pull `x` out of serde's "missing field `x`" message.
fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
