//! Retry with backoff
//!
//! Each attempt races the operation against a timeout and the turn's
//! cancellation token. Non-retryable errors stop the loop at once; the rest
//! are retried up to `retries + 1` attempts with a capped backoff delay.

use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately
    #[default]
    None,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl BackoffStrategy {
    /// Delay after failed attempt number `attempt` (1-indexed), capped at `max`
    pub fn delay(&self, base: Duration, attempt: u32, max: Duration) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Linear => base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        };
        delay.min(max)
    }
}

/// Parameters of one retry loop
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

/// Result of a retry loop and how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ToolError>,
    pub attempts: u32,
}

/// Run `operation` under the retry settings
///
/// `operation` receives the 1-indexed attempt number.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    settings: &RetrySettings,
    cancellation: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ToolError>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ToolError::cancelled("Execution cancelled")),
            res = tokio::time::timeout(settings.timeout, operation(attempt)) => {
                res.unwrap_or_else(|_| Err(ToolError::timeout(settings.timeout)))
            }
        };

        let error = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            tracing::debug!(
                tool = %label,
                attempt,
                retryable = error.is_retryable(),
                error = %error,
                "Giving up"
            );
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = settings
            .backoff
            .delay(settings.base_delay, attempt, settings.max_backoff);
        tracing::warn!(
            tool = %label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return RetryOutcome {
                    result: Err(ToolError::cancelled("Cancelled during backoff")),
                    attempts: attempt,
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
