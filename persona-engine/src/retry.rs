//! Bounded retry with exponential backoff for slow external calls.
//!
//! Embedding and generation calls go through a [`RetryPolicy`]: each attempt
//! runs under a per-call timeout, failed attempts back off exponentially,
//! and the last error propagates once attempts are exhausted.

use std::future::Future;
use std::time::Duration;

use crate::types::EngineError;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy without backoff delays, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Runs `attempt_fn` until it succeeds or attempts are exhausted.
    ///
    /// A timed-out attempt is a retryable failure like any other; every
    /// failed attempt is logged with its reason.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = EngineError::InvalidArgument(format!(
            "retry policy for '{operation}' allows no attempts"
        ));

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.call_timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    tracing::warn!(operation, attempt, error = %err, "external call failed");
                    last_err = err;
                }
                Err(_) => {
                    let err = EngineError::Timeout {
                        operation: operation.to_string(),
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    };
                    tracing::warn!(operation, attempt, error = %err, "external call timed out");
                    last_err = err;
                }
            }
            if attempt < attempts {
                let backoff = self.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_err)
    }
}
