//! Agent Core error types.
//!
//! Only terminal failures of a query live here. Tool failures and malformed
//! stream lines are absorbed where they happen and never reach this type.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that end an `execute_query` call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No API key for the configured provider.
    #[error("API key not configured for provider '{provider}'. Add it in settings or set {env_var}.")]
    MissingCredentials { provider: String, env_var: String },

    /// The completion endpoint failed (transport exhausted, HTTP error, broken stream).
    #[error("{0}")]
    Inference(InferenceError),

    /// The caller cancelled the query.
    #[error("Request aborted")]
    Cancelled,

    /// The event receiver went away; nobody is listening.
    #[error("event channel closed")]
    ChannelClosed,
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Cancelled => AgentError::Cancelled,
            other => AgentError::Inference(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_inference_maps_to_cancelled() {
        let err: AgentError = InferenceError::Cancelled.into();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(err.to_string(), "Request aborted");
    }

    #[test]
    fn test_http_error_message_carries_status_and_body() {
        let err: AgentError = InferenceError::HttpError {
            status: 402,
            body: "insufficient credits".into(),
        }
        .into();
        assert_eq!(err.to_string(), "HTTP 402: insufficient credits");
    }
}
