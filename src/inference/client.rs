//! OpenAI-compatible streaming completion client.
//!
//! Sends chat completion requests to the configured endpoint and streams back
//! tokens and tool calls. Transport failures are retried with exponential
//! backoff; HTTP status errors are returned immediately.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;
use super::retry::{retry_transport, RetryPolicy};
use super::streaming::{parse_sse_stream, StreamChunk};
use super::types::{ChatCompletionRequest, ChatMessage, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-attempt deadline, covering the request and the body stream.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

// ─── Settings ────────────────────────────────────────────────────────────────

/// Endpoint and sampling settings for a [`CompletionClient`].
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    /// Base URL; requests go to `{base_url}/completions`.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

/// A completion stream, boxed so callers can hold it across turns.
pub type CompletionStream = BoxStream<'static, Result<StreamChunk, InferenceError>>;

// ─── CompletionClient ────────────────────────────────────────────────────────

/// Client for the remote chat-completion endpoint.
pub struct CompletionClient {
    http: HttpClient,
    settings: CompletionSettings,
}

impl CompletionClient {
    /// Build a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(settings: CompletionSettings) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: settings.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }

    /// The full completions URL.
    pub fn endpoint(&self) -> String {
        format!("{}/completions", self.settings.base_url.trim_end_matches('/'))
    }

    /// Send a streaming chat completion request.
    ///
    /// Retries transport failures per the configured [`RetryPolicy`]. Each
    /// attempt has its own deadline, which keeps running while the returned
    /// stream is read.
    pub async fn chat_completion_stream(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        cancel: &CancellationToken,
    ) -> Result<CompletionStream, InferenceError> {
        let url = self.endpoint();
        let body = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream: true,
        };

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "completion request"
        );

        let url_ref = url.as_str();
        let body_ref = &body;
        let (response, deadline) = retry_transport(&self.settings.retry, cancel, move |_| {
            self.try_stream_request(url_ref, api_key, body_ref)
        })
        .await?;

        let timeout_secs = self.settings.attempt_timeout.as_secs();
        Ok(parse_sse_stream(Box::pin(response.bytes_stream()), deadline, timeout_secs).boxed())
    }

    /// One attempt: send the request and check the status.
    async fn try_stream_request(
        &self,
        url: &str,
        api_key: &str,
        body: &ChatCompletionRequest,
    ) -> Result<(reqwest::Response, tokio::time::Instant), InferenceError> {
        let timeout = self.settings.attempt_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let send = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .header("Accept", "text/event-stream")
            .json(body)
            .send();

        let response = match tokio::time::timeout_at(deadline, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: timeout.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.to_string(),
                        reason: e.to_string(),
                    }
                });
            }
            Err(_) => {
                return Err(InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "completion request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok((response, deadline))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
