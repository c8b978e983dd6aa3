//! Tool call and tool result types shared by the executor, the MCP
//! connection manager and the agent loop.

use serde::{Deserialize, Serialize};

/// A tool call ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    /// Build a call from the raw, accumulated `arguments` string.
    ///
    /// Arguments that are not a JSON object are preserved as `{"raw": ...}`
    /// so the turn can continue and the tool can report a useful error.
    pub fn from_arguments(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            input: parse_arguments(arguments),
        }
    }
}

/// Best-effort parse of a tool-call arguments string into an object.
pub fn parse_arguments(arguments: &str) -> serde_json::Map<String, serde_json::Value> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return serde_json::Map::new();
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            tracing::warn!(arguments = %arguments, "tool arguments are not a JSON object");
            let mut map = serde_json::Map::new();
            map.insert(
                "raw".to_string(),
                serde_json::Value::String(arguments.to_string()),
            );
            map
        }
    }
}

/// Outcome of a single tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text fed back to the model as the `tool` message content.
    pub fn model_text(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
