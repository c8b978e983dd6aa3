//! Incremental Server-Sent Events decoder.
//!
//! Bytes arrive in arbitrary chunks: a line (or even a UTF-8 sequence) may be
//! split across two network reads. The decoder keeps the incomplete tail in
//! its buffer and only interprets complete lines. Used by the completion
//! stream and by the MCP `sse` and `http` transports.
//!
//! The completion stream is a plain sequence of `data:` lines, so its
//! decoder ([`SseDecoder::per_data_line`]) emits one event per line instead
//! of waiting for the blank line that ends a standard event.

/// A dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if one was given.
    pub event: Option<String>,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Event type, defaulting to `message` as the SSE standard specifies.
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Stateful decoder: feed bytes, get complete events back.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    per_data_line: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that dispatches every complete `data:` line on its own.
    pub fn per_data_line() -> Self {
        Self {
            per_data_line: true,
            ..Self::default()
        }
    }

    /// Append `bytes` and return every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line[..]);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush state at end of stream: a trailing unterminated line and any
    /// event still missing its blank-line terminator.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push(value.to_string());
                if self.per_data_line {
                    return self.dispatch();
                }
            }
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[0].kind(), "message");
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: hel").is_empty());
        assert!(decoder.feed(b"lo\n").is_empty());
        let events = decoder.feed(b"\n");
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        // Split inside the two-byte 'é'.
        assert!(decoder.feed(&bytes[..8]).is_empty());
        let events = decoder.feed(&bytes[8..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_named_event_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: endpoint\r\ndata: /messages?id=1\r\n\r\n");
        assert_eq!(events[0].kind(), "endpoint");
        assert_eq!(events[0].data, "/messages?id=1");
    }

    #[test]
    fn test_comments_and_keepalives_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn test_multiple_data_lines_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_per_data_line_needs_no_blank_separator() {
        let mut decoder = SseDecoder::per_data_line();
        let events = decoder.feed(b"data: a\ndata: b\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[1].data, "b");
        assert!(decoder.feed(b"\n").is_empty());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        let events = decoder.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }
}
