//! Message list construction and context window trimming.
//!
//! Responsibilities:
//! - Resolve the system prompt (literal text or a named preset)
//! - Convert prior conversation history into wire messages
//! - Build the current user prompt from text or text/image blocks
//! - Bound context growth by dropping the middle of long histories

use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, ContentPart, ImageUrl, MessageContent, Role};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Messages kept after the system message when trimming.
pub const DEFAULT_HISTORY_WINDOW: usize = 40;

const DEFAULT_PRESET: &str = "You are a capable assistant with access to tools for reading, \
writing and searching files and for running shell commands in the user's working directory. \
Use tools when they help answer the request, check results before relying on them, and reply \
concisely once the task is done.";

const CODING_PRESET: &str = "You are an expert software engineer working inside the user's \
project directory. Explore the code with list, glob, grep and read before changing it. Make \
minimal, targeted edits with edit, prefer existing conventions, and verify changes with bash \
when a build or test command is available. Never run destructive commands.";

// ─── System Prompt ──────────────────────────────────────────────────────────

/// The system message: literal text, or a named preset with optional extra text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Preset {
        preset: String,
        #[serde(default)]
        append: Option<String>,
    },
}

impl Default for SystemPrompt {
    fn default() -> Self {
        SystemPrompt::Preset {
            preset: "default".into(),
            append: None,
        }
    }
}

impl SystemPrompt {
    /// The final system text.
    pub fn resolve(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Preset { preset, append } => {
                let base = preset_text(preset);
                match append.as_deref().map(str::trim) {
                    Some(extra) if !extra.is_empty() => format!("{base}\n\n{extra}"),
                    _ => base.to_string(),
                }
            }
        }
    }
}

/// Preset body by name. Unknown names fall back to `default`.
pub fn preset_text(name: &str) -> &'static str {
    match name {
        "coding" => CODING_PRESET,
        "default" => DEFAULT_PRESET,
        other => {
            tracing::warn!(preset = other, "unknown system prompt preset, using default");
            DEFAULT_PRESET
        }
    }
}

// ─── Prompt & History ───────────────────────────────────────────────────────

/// One block of a multi-part prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptBlock {
    Text { text: String },
    /// `url` is an `https:` URL or a `data:` URI.
    Image { url: String },
}

/// The current user prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Blocks(Vec<PromptBlock>),
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl Prompt {
    pub fn to_content(&self) -> MessageContent {
        match self {
            Prompt::Text(text) => MessageContent::Text(text.clone()),
            Prompt::Blocks(blocks) => MessageContent::Parts(
                blocks
                    .iter()
                    .map(|block| match block {
                        PromptBlock::Text { text } => ContentPart::Text { text: text.clone() },
                        PromptBlock::Image { url } => ContentPart::ImageUrl {
                            image_url: ImageUrl { url: url.clone() },
                        },
                    })
                    .collect(),
            ),
        }
    }
}

/// A prior turn as the host stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    /// Convert to the wire shape. Stored tool messages carry no call id, so
    /// they are replayed as assistant text.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            Role::System => ChatMessage::system(self.content.clone()),
            Role::User => ChatMessage::user(MessageContent::Text(self.content.clone())),
            Role::Assistant | Role::Tool => ChatMessage::assistant(self.content.clone()),
        }
    }
}

/// System message, then history, then the current prompt.
pub fn build_messages(
    system: &SystemPrompt,
    history: &[HistoryMessage],
    prompt: &Prompt,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system.resolve()));
    messages.extend(history.iter().map(HistoryMessage::to_chat_message));
    messages.push(ChatMessage::user(prompt.to_content()));
    messages
}

// ─── Trimming ───────────────────────────────────────────────────────────────

/// Keep the first message plus the last `window` once the list exceeds
/// `window + 2`. Returns the number of messages dropped.
pub fn trim_history(messages: &mut Vec<ChatMessage>, window: usize) -> usize {
    if messages.len() <= window + 2 {
        return 0;
    }

    let dropped = messages.len() - 1 - window;
    messages.drain(1..1 + dropped);
    tracing::info!(dropped, kept = messages.len(), "trimmed conversation history");
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("sys")];
        messages.extend((0..n).map(|i| ChatMessage::assistant(format!("m{i}"))));
        messages
    }

    #[test]
    fn test_trim_keeps_system_and_last_forty() {
        let mut messages = numbered(50);
        let dropped = trim_history(&mut messages, DEFAULT_HISTORY_WINDOW);

        assert_eq!(dropped, 10);
        assert_eq!(messages.len(), 41);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "m10");
        assert_eq!(messages[40].text(), "m49");
    }

    #[test]
    fn test_trim_leaves_short_histories_alone() {
        let mut messages = numbered(41);
        assert_eq!(messages.len(), 42);
        assert_eq!(trim_history(&mut messages, DEFAULT_HISTORY_WINDOW), 0);
        assert_eq!(messages.len(), 42);

        let mut messages = numbered(42);
        trim_history(&mut messages, DEFAULT_HISTORY_WINDOW);
        assert_eq!(messages.len(), 41);
    }

    #[test]
    fn test_preset_resolution() {
        let prompt = SystemPrompt::Preset {
            preset: "coding".into(),
            append: Some("Project uses Rust.".into()),
        };
        let text = prompt.resolve();
        assert!(text.starts_with(CODING_PRESET));
        assert!(text.ends_with("Project uses Rust."));

        let unknown = SystemPrompt::Preset {
            preset: "pirate".into(),
            append: None,
        };
        assert_eq!(unknown.resolve(), DEFAULT_PRESET);
        assert_eq!(SystemPrompt::Text("be brief".into()).resolve(), "be brief");
    }

    #[test]
    fn test_system_prompt_deserializes_both_shapes() {
        let text: SystemPrompt = serde_json::from_str(r#""custom""#).unwrap();
        assert_eq!(text, SystemPrompt::Text("custom".into()));
        let preset: SystemPrompt =
            serde_json::from_str(r#"{"preset":"coding","append":"x"}"#).unwrap();
        assert!(matches!(preset, SystemPrompt::Preset { ref preset, .. } if preset == "coding"));
    }

    #[test]
    fn test_build_messages_order() {
        let history = vec![
            HistoryMessage { role: Role::User, content: "earlier".into() },
            HistoryMessage { role: Role::Assistant, content: "reply".into() },
        ];
        let prompt = Prompt::Blocks(vec![
            PromptBlock::Text { text: "what is this".into() },
            PromptBlock::Image { url: "data:image/png;base64,AAAA".into() },
        ]);

        let messages = build_messages(&SystemPrompt::Text("sys".into()), &history, &prompt);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "earlier");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].role, Role::User);

        let json = serde_json::to_value(&messages[3]).unwrap();
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }
}
