//! Orchestrator: the streaming tool-calling loop.
//!
//! One `execute_query` call drives a conversation until the model answers
//! without requesting tools or the turn budget runs out:
//!
//! ```text
//! build request → stream deltas → (tool calls?) → dispatch → append results → next turn
//!                                      └── none ──→ result
//! ```
//!
//! Text deltas are forwarded as they arrive; tool invocations are announced
//! before they run. Exactly one terminal event (`error` or `result`) is sent
//! per call.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::inference::types::{ChatMessage, ToolCallRef};
use crate::inference::{CompletionClient, StreamChunk};
use crate::mcp_client::{ConnectionManager, ServerConfig};
use crate::tools::{ToolCall, BASH_TIMEOUT};

use super::conversation::{
    build_messages, trim_history, HistoryMessage, Prompt, SystemPrompt, DEFAULT_HISTORY_WINDOW,
};
use super::credentials::{env_var_for, CredentialStore};
use super::dispatcher::ToolDispatcher;
use super::errors::AgentError;
use super::events::AgentEvent;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default upper bound on completion rounds per query.
pub const DEFAULT_MAX_TURNS: u32 = 50;

// ─── Settings & Options ─────────────────────────────────────────────────────

/// Host-level loop settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Key into the credential map.
    pub provider: String,
    pub max_turns: u32,
    pub history_window: usize,
    /// Wall-clock limit for one `bash` tool call.
    pub bash_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider: "openrouter".into(),
            max_turns: DEFAULT_MAX_TURNS,
            history_window: DEFAULT_HISTORY_WINDOW,
            bash_timeout: BASH_TIMEOUT,
        }
    }
}

/// Everything that varies per query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub prompt: Prompt,
    pub history: Vec<HistoryMessage>,
    pub system_prompt: SystemPrompt,
    /// Working directory for built-in tools.
    pub cwd: PathBuf,
    /// Overrides [`OrchestratorSettings::max_turns`].
    pub max_turns: Option<u32>,
    /// Servers to connect before the first turn.
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    /// Built-in tools to advertise; `None` advertises all of them.
    pub allowed_tools: Option<Vec<String>>,
    pub cancel: CancellationToken,
}

impl QueryOptions {
    pub fn new(prompt: impl Into<Prompt>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            system_prompt: SystemPrompt::default(),
            cwd: cwd.into(),
            max_turns: None,
            mcp_servers: BTreeMap::new(),
            allowed_tools: None,
            cancel: CancellationToken::new(),
        }
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    client: CompletionClient,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: ToolDispatcher,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// `manager` may be shared with other orchestrators.
    pub fn new(
        client: CompletionClient,
        credentials: Arc<dyn CredentialStore>,
        manager: Arc<ConnectionManager>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            credentials,
            dispatcher: ToolDispatcher::new(manager).with_bash_timeout(settings.bash_timeout),
            settings,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        self.dispatcher.manager()
    }

    /// Run one query, streaming events into `events`.
    ///
    /// Never returns an error: every failure becomes the terminal `error`
    /// event. Returns early without a terminal event only if the receiver
    /// was dropped.
    pub async fn execute_query(&self, options: QueryOptions, events: mpsc::Sender<AgentEvent>) {
        let terminal = match self.run(&options, &events).await {
            Ok(text) => AgentEvent::Result { result: text },
            Err(AgentError::ChannelClosed) => {
                tracing::debug!("event receiver dropped, abandoning query");
                return;
            }
            Err(e) => {
                let error = if options.cancel.is_cancelled() {
                    AgentError::Cancelled.to_string()
                } else {
                    e.to_string()
                };
                tracing::warn!(error = %error, "query failed");
                AgentEvent::Error { error }
            }
        };
        let _ = events.send(terminal).await;
    }

    async fn run(
        &self,
        options: &QueryOptions,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<String, AgentError> {
        let provider = &self.settings.provider;
        let api_key = self
            .credentials
            .api_key(provider)
            .ok_or_else(|| AgentError::MissingCredentials {
                provider: provider.clone(),
                env_var: env_var_for(provider),
            })?;

        let cancel = &options.cancel;
        if !options.mcp_servers.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = self.manager().initialize(&options.mcp_servers) => {}
            }
        }

        let tools = self
            .dispatcher
            .tool_definitions(options.allowed_tools.as_deref())
            .await;
        let tools = (!tools.is_empty()).then_some(tools);

        let mut messages = build_messages(&options.system_prompt, &options.history, &options.prompt);
        let max_turns = options.max_turns.unwrap_or(self.settings.max_turns);
        let mut total_text = String::new();

        for round in 0..max_turns {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            trim_history(&mut messages, self.settings.history_window);

            tracing::info!(
                round,
                message_count = messages.len(),
                tool_count = tools.as_ref().map(|t| t.len()).unwrap_or(0),
                "starting turn"
            );

            let mut stream = self
                .client
                .chat_completion_stream(&api_key, messages.clone(), tools.clone(), cancel)
                .await?;

            let mut turn_text = String::new();
            let mut tool_calls: Vec<ToolCallRef> = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(StreamChunk::Token(token))) => {
                        turn_text.push_str(&token);
                        total_text.push_str(&token);
                        emit(events, AgentEvent::text(token)).await?;
                    }
                    Some(Ok(StreamChunk::Done { tool_calls: calls })) => tool_calls = calls,
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }

            if tool_calls.is_empty() {
                tracing::info!(round, text_len = total_text.len(), "model produced final answer");
                return Ok(total_text);
            }

            tracing::info!(round, tool_calls = tool_calls.len(), "model requested tools");
            messages.push(ChatMessage::assistant_tool_calls(turn_text, tool_calls.clone()));

            for call_ref in &tool_calls {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let call = ToolCall::from_arguments(
                    &call_ref.id,
                    &call_ref.function.name,
                    &call_ref.function.arguments,
                );
                emit(
                    events,
                    AgentEvent::tool_use(&call.id, &call.name, call.input.clone()),
                )
                .await?;

                let result = tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    result = self.dispatcher.dispatch(&call, &options.cwd) => result,
                };
                if !result.success {
                    tracing::warn!(
                        tool = %call.name,
                        error = result.error.as_deref().unwrap_or(""),
                        "tool call failed"
                    );
                }
                messages.push(ChatMessage::tool(&call.id, result.model_text()));
            }
        }

        tracing::info!(max_turns, "turn budget exhausted");
        Ok(total_text)
    }
}

async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), AgentError> {
    events.send(event).await.map_err(|_| AgentError::ChannelClosed)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::agent_core::credentials::StaticCredentials;
    use crate::agent_core::events::AssistantContent;
    use crate::inference::{CompletionSettings, RetryPolicy};

    /// Canned completion endpoint. Serves `responses` in order, one per
    /// request, and records every request body.
    struct FakeEndpoint {
        base_url: String,
        requests: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl FakeEndpoint {
        async fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = requests.clone();

            tokio::spawn(async move {
                for (status, body) in responses {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let request = read_request(&mut socket).await;
                    recorded.lock().unwrap().push(request);

                    let reason = if status == 200 { "OK" } else { "Error" };
                    let content_type = if status == 200 { "text/event-stream" } else { "text/plain" };
                    let head = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self {
                base_url: format!("http://{addr}/v1"),
                requests,
            }
        }

        /// Serves one streaming response that sends `first` and then stalls
        /// with the connection held open.
        async fn start_stalling(first: String) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = requests.clone();

            tokio::spawn(async move {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                recorded.lock().unwrap().push(request);
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.write_all(first.as_bytes()).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });

            Self {
                base_url: format!("http://{addr}/v1"),
                requests,
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, i: usize) -> serde_json::Value {
            self.requests.lock().unwrap()[i].clone()
        }
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> serde_json::Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return serde_json::Value::Null;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if buf.len() >= body_start + length {
                return serde_json::from_slice(&buf[body_start..body_start + length])
                    .unwrap_or(serde_json::Value::Null);
            }
        }
    }

    fn sse(chunks: &[serde_json::Value]) -> String {
        let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn text_delta(text: &str) -> serde_json::Value {
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    }

    fn tool_delta(id: Option<&str>, name: Option<&str>, args: &str) -> serde_json::Value {
        let mut call = serde_json::json!({"index": 0, "function": {"arguments": args}});
        if let Some(id) = id {
            call["id"] = id.into();
        }
        if let Some(name) = name {
            call["function"]["name"] = name.into();
        }
        serde_json::json!({"choices": [{"delta": {"tool_calls": [call]}}]})
    }

    fn orchestrator(base_url: &str, api_key: &str) -> Orchestrator {
        let client = CompletionClient::new(CompletionSettings {
            base_url: base_url.to_string(),
            model: "test-model".into(),
            temperature: 0.0,
            max_tokens: 256,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
            },
            attempt_timeout: Duration::from_secs(10),
        })
        .unwrap();

        Orchestrator::new(
            client,
            Arc::new(StaticCredentials::single("openrouter", api_key)),
            Arc::new(ConnectionManager::default()),
            OrchestratorSettings::default(),
        )
    }

    async fn run_query(orch: &Orchestrator, options: QueryOptions) -> Vec<AgentEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        orch.execute_query(options, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_list_files_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let endpoint = FakeEndpoint::start(vec![
            (
                200,
                sse(&[
                    tool_delta(Some("call_1"), Some("list"), "{\"path\":"),
                    tool_delta(None, None, "\".\"}"),
                ]),
            ),
            (200, sse(&[text_delta("Here are "), text_delta("the files.")])),
        ])
        .await;

        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let events = run_query(&orch, QueryOptions::new("list files", dir.path())).await;

        assert_eq!(endpoint.request_count(), 2);
        assert_eq!(events.len(), 4, "{events:?}");
        match &events[0] {
            AgentEvent::Assistant {
                content: AssistantContent::ToolUse { id, name, input },
            } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "list");
                assert_eq!(input["path"], ".");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        assert_eq!(events[1], AgentEvent::text("Here are "));
        assert_eq!(events[2], AgentEvent::text("the files."));
        assert_eq!(
            events[3],
            AgentEvent::Result {
                result: "Here are the files.".into()
            }
        );

        let first = endpoint.request(0);
        assert_eq!(first["stream"], true);
        assert_eq!(first["tool_choice"], "auto");
        assert_eq!(first["tools"].as_array().unwrap().len(), 7);

        let second = endpoint.request(1);
        let messages = second["messages"].as_array().unwrap();
        let assistant = &messages[messages.len() - 2];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"], "");
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"path\":\".\"}");
        let tool = &messages[messages.len() - 1];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert!(tool["content"].as_str().unwrap().contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_no_tool_calls_ends_after_one_turn() {
        let endpoint = FakeEndpoint::start(vec![
            (200, sse(&[text_delta("done")])),
            (200, sse(&[text_delta("unexpected")])),
        ])
        .await;

        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let mut options = QueryOptions::new("hello", ".");
        options.max_turns = Some(50);
        let events = run_query(&orch, options).await;

        assert_eq!(endpoint.request_count(), 1);
        assert_eq!(events.last(), Some(&AgentEvent::Result { result: "done".into() }));
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back_not_terminal() {
        let endpoint = FakeEndpoint::start(vec![
            (
                200,
                sse(&[tool_delta(Some("call_1"), Some("read"), "{\"path\":\"missing.txt\"}")]),
            ),
            (200, sse(&[text_delta("That file does not exist.")])),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();

        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let events = run_query(&orch, QueryOptions::new("read it", dir.path())).await;

        assert!(matches!(events.last(), Some(AgentEvent::Result { .. })));
        let messages = endpoint.request(1)["messages"].as_array().unwrap().clone();
        let tool = messages.last().unwrap();
        assert!(tool["content"].as_str().unwrap().starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_turn_budget_is_not_an_error() {
        let endpoint = FakeEndpoint::start(vec![(
            200,
            sse(&[
                text_delta("checking"),
                tool_delta(Some("call_1"), Some("list"), "{}"),
            ]),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();

        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let mut options = QueryOptions::new("loop", dir.path());
        options.max_turns = Some(1);
        let events = run_query(&orch, options).await;

        assert_eq!(endpoint.request_count(), 1);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::Result { result: "checking".into() })
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_makes_no_request() {
        let endpoint = FakeEndpoint::start(vec![(200, sse(&[text_delta("x")]))]).await;
        let orch = orchestrator(&endpoint.base_url, "");
        let events = run_query(&orch, QueryOptions::new("hello", ".")).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Error { error } => assert!(error.contains("API key not configured")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(endpoint.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_turn() {
        let endpoint = FakeEndpoint::start(vec![(200, sse(&[text_delta("x")]))]).await;
        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let options = QueryOptions::new("hello", ".");
        options.cancel.cancel();

        let events = run_query(&orch, options).await;
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                error: "Request aborted".into()
            }]
        );
        assert_eq!(endpoint.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_stream_chunks() {
        let endpoint =
            FakeEndpoint::start_stalling(format!("data: {}\n\n", text_delta("partial"))).await;
        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let options = QueryOptions::new("hello", ".");
        let cancel = options.cancel.clone();

        let (tx, mut rx) = mpsc::channel(64);
        let started = std::time::Instant::now();
        let consume = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                if event == AgentEvent::text("partial") {
                    cancel.cancel();
                }
                events.push(event);
            }
            events
        };
        let ((), events) = tokio::join!(orch.execute_query(options, tx), consume);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            events,
            vec![
                AgentEvent::text("partial"),
                AgentEvent::Error {
                    error: "Request aborted".into()
                }
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_between_tool_dispatches_skips_remaining_calls() {
        let two_calls = serde_json::json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "bash", "arguments": "{\"command\":\"sleep 1\"}"}},
            {"index": 1, "id": "call_2", "function": {"name": "write", "arguments": "{\"path\":\"late.txt\",\"content\":\"x\"}"}}
        ]}}]});
        let endpoint = FakeEndpoint::start(vec![
            (200, sse(&[two_calls])),
            (200, sse(&[text_delta("unreachable")])),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let options = QueryOptions::new("do two things", dir.path());
        let cancel = options.cancel.clone();

        let (tx, mut rx) = mpsc::channel(64);
        let consume = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                if matches!(&event, AgentEvent::Assistant { content: AssistantContent::ToolUse { .. } }) {
                    cancel.cancel();
                }
                events.push(event);
            }
            events
        };
        let ((), events) = tokio::join!(orch.execute_query(options, tx), consume);

        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(
            &events[0],
            AgentEvent::Assistant { content: AssistantContent::ToolUse { name, .. } } if name == "bash"
        ));
        assert_eq!(
            events[1],
            AgentEvent::Error {
                error: "Request aborted".into()
            }
        );
        assert!(!dir.path().join("late.txt").exists());
        assert_eq!(endpoint.request_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_during_mcp_setup() {
        use crate::mcp_client::manager::tests::fake_server;

        let endpoint = FakeEndpoint::start(vec![(200, sse(&[text_delta("x")]))]).await;
        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let mut options = QueryOptions::new("hello", ".");
        options
            .mcp_servers
            .insert("slow".into(), fake_server(&[("STARTUP_DELAY", "10")]));
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let events = run_query(&orch, options).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                error: "Request aborted".into()
            }]
        );
        assert_eq!(endpoint.request_count(), 0);
        orch.manager().close().await;
    }

    #[tokio::test]
    async fn test_http_error_is_terminal_and_not_retried() {
        let endpoint = FakeEndpoint::start(vec![
            (500, "upstream exploded".to_string()),
            (200, sse(&[text_delta("x")])),
        ])
        .await;
        let orch = orchestrator(&endpoint.base_url, "sk-test");
        let events = run_query(&orch, QueryOptions::new("hello", ".")).await;

        assert_eq!(endpoint.request_count(), 1);
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                error: "HTTP 500: upstream exploded".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let orch = orchestrator(&format!("http://{addr}/v1"), "sk-test");
        let events = run_query(&orch, QueryOptions::new("hello", ".")).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Error { error } => {
                assert!(error.contains("after 3 attempts"), "{error}")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
