//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a response body as a byte stream, feeds it through the incremental
//! [`SseDecoder`], parses each `data:` line as a [`ChatCompletionChunk`], and
//! accumulates tool call fragments across deltas.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

use super::errors::InferenceError;
use super::sse::SseDecoder;
use super::types::{ChatCompletionChunk, ChunkToolCall, ToolCallRef};

// ─── Public Types ────────────────────────────────────────────────────────────

/// One item of a parsed completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental assistant text.
    Token(String),
    /// The turn's stream ended. Carries the validated tool calls, which may
    /// be empty when the model produced a final answer.
    Done { tool_calls: Vec<ToolCallRef> },
}

// ─── Tool Call Accumulation ──────────────────────────────────────────────────

/// A tool call being assembled from indexed fragments.
#[derive(Debug, Default)]
struct PendingToolCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call fragments keyed by their `index`.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: Vec<PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta's fragments.
    ///
    /// The first fragment for an index allocates a slot. Later fragments
    /// append to `arguments` and set `id`/`name` when they carry one.
    pub fn apply(&mut self, fragments: &[ChunkToolCall]) {
        for fragment in fragments {
            let index = fragment.index.unwrap_or(0);
            let position = match self.pending.iter().position(|p| p.index == index) {
                Some(pos) => pos,
                None => {
                    self.pending.push(PendingToolCall {
                        index,
                        ..Default::default()
                    });
                    self.pending.len() - 1
                }
            };
            let slot = &mut self.pending[position];

            if let Some(id) = fragment.id.as_deref().filter(|s| !s.is_empty()) {
                slot.id = id.to_string();
            }
            if let Some(function) = &fragment.function {
                if let Some(name) = function.name.as_deref().filter(|s| !s.is_empty()) {
                    slot.name = name.to_string();
                }
                if let Some(args) = &function.arguments {
                    slot.arguments.push_str(args);
                }
            }
        }
    }

    /// Finalize: keep only calls with both an `id` and a `name`, ordered by index.
    pub fn finish(&mut self) -> Vec<ToolCallRef> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|p| p.index);

        pending
            .into_iter()
            .filter_map(|p| {
                if p.id.is_empty() || p.name.is_empty() {
                    tracing::warn!(
                        index = p.index,
                        id = %p.id,
                        name = %p.name,
                        "dropping incomplete tool call"
                    );
                    return None;
                }
                Some(ToolCallRef::new(p.id, p.name, p.arguments))
            })
            .collect()
    }
}

// ─── Line Parser ─────────────────────────────────────────────────────────────

/// Stateful parser for one turn's completion stream.
#[derive(Debug)]
pub struct CompletionParser {
    decoder: SseDecoder,
    tool_calls: ToolCallAccumulator,
    done: bool,
}

impl Default for CompletionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionParser {
    pub fn new() -> Self {
        Self {
            decoder: SseDecoder::per_data_line(),
            tool_calls: ToolCallAccumulator::new(),
            done: false,
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw body bytes; returns the text deltas they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let events = self.decoder.feed(bytes);
        self.process_events(events)
    }

    /// Flush the decoder at end of body.
    pub fn finish(&mut self) -> Vec<String> {
        let events = self.decoder.finish();
        let tokens = self.process_events(events);
        self.done = true;
        tokens
    }

    /// Take the validated tool calls accumulated so far.
    pub fn take_tool_calls(&mut self) -> Vec<ToolCallRef> {
        self.tool_calls.finish()
    }

    fn process_events(&mut self, events: Vec<super::sse::SseEvent>) -> Vec<String> {
        let mut tokens = Vec::new();
        for event in events {
            for line in event.data.split('\n') {
                if self.done {
                    return tokens;
                }
                if let Some(token) = self.process_data_line(line) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    /// Handle one `data:` payload. Malformed JSON is logged and skipped.
    fn process_data_line(&mut self, data: &str) -> Option<String> {
        let data = data.trim();
        if data.is_empty() {
            return None;
        }
        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, data = %data, "skipping malformed stream line");
                return None;
            }
        };

        let choice = chunk.choices.into_iter().next()?;
        if let Some(fragments) = &choice.delta.tool_calls {
            self.tool_calls.apply(fragments);
        }
        choice.delta.content.filter(|c| !c.is_empty())
    }
}

// ─── Stream Adapter ──────────────────────────────────────────────────────────

/// Parse a completion response body into [`StreamChunk`]s.
///
/// Emits a `Token` per text delta and exactly one final `Done`. Reading past
/// `deadline` yields an [`InferenceError::Timeout`]; a broken body yields a
/// [`InferenceError::StreamError`]. Either ends the stream.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
    deadline: tokio::time::Instant,
    timeout_secs: u64,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    struct State<S> {
        byte_stream: S,
        parser: CompletionParser,
        queue: VecDeque<StreamChunk>,
        finished: bool,
    }

    let state = State {
        byte_stream,
        parser: CompletionParser::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(chunk) = state.queue.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }
            if state.parser.is_done() {
                state.finished = true;
                let tool_calls = state.parser.take_tool_calls();
                state.queue.push_back(StreamChunk::Done { tool_calls });
                continue;
            }

            let next = tokio::time::timeout_at(deadline, state.byte_stream.next()).await;
            match next {
                Ok(Some(Ok(bytes))) => {
                    let tokens = state.parser.feed(bytes.as_ref());
                    state.queue.extend(tokens.into_iter().map(StreamChunk::Token));
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    return Some((
                        Err(InferenceError::StreamError {
                            reason: format!("stream read error: {e}"),
                        }),
                        state,
                    ));
                }
                Ok(None) => {
                    let tokens = state.parser.finish();
                    state.queue.extend(tokens.into_iter().map(StreamChunk::Token));
                }
                Err(_) => {
                    state.finished = true;
                    return Some((
                        Err(InferenceError::Timeout {
                            duration_secs: timeout_secs,
                        }),
                        state,
                    ));
                }
            }
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
