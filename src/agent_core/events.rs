//! Events streamed to the caller while a query runs.
//!
//! Serialised with a `type` tag so a host can forward them as JSON lines:
//!
//! ```json
//! {"type":"assistant","content":{"type":"text","text":"Hello"}}
//! {"type":"assistant","content":{"type":"tool_use","id":"call_1","name":"list","input":{"path":"."}}}
//! {"type":"result","result":"Hello"}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant output for live display.
    Assistant { content: AssistantContent },
    /// Terminal failure.
    Error { error: String },
    /// Terminal success carrying the accumulated text of every turn.
    Result { result: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Map<String, serde_json::Value>,
    },
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        AgentEvent::Assistant {
            content: AssistantContent::Text { text: text.into() },
        }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        AgentEvent::Assistant {
            content: AssistantContent::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            },
        }
    }
}
