//! Retry with exponential backoff for transient LLM failures.
//!
//! Rate limits, 5xx responses, network failures, and per-call timeouts are
//! retried; everything else fails immediately. Backoff sleeps end early
//! when the run is cancelled.

use std::future::Future;
use std::time::Duration;

use proto::LlmError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry and timeout settings for one LLM client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single backoff delay.
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Timeout for one HTTP call.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = delay_ms.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(clamped)
    }
}

/// Runs `operation` under `policy`, retrying transient failures.
///
/// Each attempt is bounded by `policy.request_timeout`; an elapsed attempt
/// counts as [`LlmError::Timeout`]. Cancellation wins over both the
/// in-flight attempt and any backoff sleep.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            outcome = tokio::time::timeout(policy.request_timeout, operation()) => {
                outcome.unwrap_or_else(|_| Err(LlmError::Timeout(policy.request_timeout.as_secs())))
            }
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient LLM failure, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => {
                if attempt > 0 {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "giving up on LLM call"
                    );
                }
                return Err(err);
            }
        }
    }
}
