//! Retry policy with exponential backoff and per-operation timeouts.
//!
//! Remote operations are wrapped in a timeout and retried on transient
//! failures with exponentially growing delays. Throttling responses that
//! carry an explicit retry-after hint override the computed backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::{ProviderError, Result, StratusError};

/// Retry and timeout bounds for remote operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per operation, including the first.
    pub max_attempts: u32,
    /// Base backoff delay, doubled on each retry.
    pub base_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Timeout applied to each attempt.
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_run_config(&RunConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from the stack's run configuration.
    #[must_use]
    pub const fn from_run_config(run: &RunConfig) -> Self {
        Self {
            max_attempts: run.max_attempts,
            base_backoff: Duration::from_millis(run.base_backoff_ms),
            max_backoff: Duration::from_secs(run.max_backoff_secs),
            operation_timeout: Duration::from_secs(run.operation_timeout_secs),
        }
    }

    /// Computes the delay before the given retry.
    ///
    /// `attempt` is 1-based: the delay returned for attempt N is slept
    /// before attempt N+1. An explicit throttling hint wins over the
    /// exponential schedule.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &StratusError) -> Duration {
        if let StratusError::Provider(ProviderError::Throttled { retry_after_secs }) = error {
            return Duration::from_secs(*retry_after_secs).min(self.max_backoff);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_backoff.saturating_mul(1 << exponent);
        delay.min(self.max_backoff)
    }

    /// Runs an operation under the policy: each attempt is bounded by the
    /// operation timeout, transient errors are retried with backoff, and
    /// terminal errors return immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once the attempt budget is exhausted, or the
    /// first terminal error encountered.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                // last_error is always set before we loop back here
                let delay = last_error
                    .as_ref()
                    .map_or(self.base_backoff, |e| self.delay_for(attempt - 1, e));
                debug!("Retrying '{operation}' (attempt {attempt}/{}) after {delay:?}", self.max_attempts);
                tokio::time::sleep(delay).await;
            }

            let outcome = tokio::time::timeout(self.operation_timeout, f()).await;
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("Transient failure in '{operation}': {e}");
                    last_error = Some(e);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        "Operation '{operation}' timed out after {:?}",
                        self.operation_timeout
                    );
                    last_error = Some(StratusError::Provider(ProviderError::Timeout {
                        operation: operation.to_string(),
                        timeout_secs: self.operation_timeout.as_secs(),
                    }));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StratusError::internal(format!("Retry loop for '{operation}' made no attempts"))
        }))
    }
}
