//! Exponential-backoff retry for transport failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::errors::InferenceError;

/// Retry settings for completion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the failed attempt numbered `attempt` (zero-based):
    /// 2s, 4s, 8s, ... with the default base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds, fails with a non-transport error, or the
/// attempts run out.
///
/// `op` receives the zero-based attempt number. Cancellation is observed
/// while an attempt is in flight and while waiting out a backoff, and
/// surfaces as [`InferenceError::Cancelled`]. There is no sleep after the
/// final attempt.
pub async fn retry_transport<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, InferenceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
            result = op(attempt) => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transport() => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "completion request failed"
                );
                last_error = Some(e);
                if attempt + 1 < attempts {
                    let delay = policy.delay_for(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(InferenceError::RetriesExhausted {
        attempts,
        last: Box::new(last_error.unwrap_or(InferenceError::StreamError {
            reason: "no attempt was made".into(),
        })),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
