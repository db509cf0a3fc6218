//! Exponential backoff retry logic for generation requests.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tracing::warn;

use crate::error::{GenerationError, SendError};

/// Defaults: 3 total attempts, base 1s, max 30s.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const INITIAL_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 30;

/// How failed generation attempts are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    /// Upper bound for any single wait, including server-requested delays.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: Duration::from_secs(INITIAL_INTERVAL_SECS),
            max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Wait before the next attempt, preferring the delay the server asked for.
    fn delay_for(&self, error: &GenerationError, backoff: &mut ExponentialBackoff) -> Duration {
        let computed = backoff.next_backoff().unwrap_or(self.max_interval);
        match error.retry_after {
            Some(requested) => requested.min(self.max_interval),
            None => computed.min(self.max_interval),
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// `attempt` receives the 1-based attempt number and is called up to
/// `policy.max_attempts` times. Only retryable kinds are retried; any other
/// error is returned on the spot as [`SendError::Generation`].
pub async fn retry_with_backoff<T, Fut, F>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, SendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match attempt(attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.kind.is_retryable() {
            return Err(SendError::Generation(error));
        }

        if attempts >= max_attempts {
            return Err(SendError::Exhausted {
                attempts,
                last: error,
            });
        }

        let wait = policy.delay_for(&error, &mut backoff);
        warn!(
            attempt = attempts,
            max_attempts,
            kind = error.kind.as_str(),
            wait_ms = wait.as_millis() as u64,
            "Generation attempt failed, retrying"
        );
        tokio::time::sleep(wait).await;
    }
}
