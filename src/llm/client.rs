//! Generation client: one transport call per attempt, wrapped in retry and timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::commit::prompt::PromptSpec;
use crate::config::Credentials;
use crate::error::{GenerationError, GenerationErrorKind, SendError};

use super::retry::{RetryPolicy, retry_with_backoff};

/// Trait for performing a single generation request.
///
/// This abstraction allows mocking the remote endpoint in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the prompt once and return the raw response text.
    async fn call(
        &self,
        prompt: &PromptSpec,
        credentials: &Credentials,
    ) -> Result<String, GenerationError>;
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(GenerationErrorKind),
}

/// Bookkeeping for one attempt. Never carries prompt or response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub attempt: u32,
    pub latency: Duration,
    pub outcome: AttemptOutcome,
    pub response_len: usize,
}

impl GenerationAttempt {
    fn log(&self) {
        debug!(
            attempt = self.attempt,
            latency_ms = self.latency.as_millis() as u64,
            outcome = ?self.outcome,
            response_len = self.response_len,
            "Generation attempt finished"
        );
    }
}

/// Sends prompts through a [`Transport`] with retry and per-attempt timeout.
pub struct GenerationClient<T> {
    transport: T,
    policy: RetryPolicy,
    verbose: bool,
}

impl<T: Transport> GenerationClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, verbose: bool) -> Self {
        Self {
            transport,
            policy,
            verbose,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send the prompt and return the raw model text.
    ///
    /// Each attempt is bounded by `timeout`; an expired attempt counts as
    /// `Timeout` and is retried like any other retryable failure.
    pub async fn send(
        &self,
        prompt: &PromptSpec,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<String, SendError> {
        if self.verbose {
            debug!(prompt = %prompt.text, "Sending prompt");
        }

        let response = retry_with_backoff(&self.policy, |attempt| {
            self.attempt(attempt, prompt, credentials, timeout)
        })
        .await?;

        if self.verbose {
            debug!(response = %response, "Received response");
        }
        Ok(response)
    }

    async fn attempt(
        &self,
        attempt: u32,
        prompt: &PromptSpec,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<String, GenerationError> {
        let started = Instant::now();

        let call = self.transport.call(prompt, credentials);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::new(
                GenerationErrorKind::Timeout,
                format!("No response within {}s", timeout.as_secs_f32()),
            )),
        };

        let record = GenerationAttempt {
            attempt,
            latency: started.elapsed(),
            outcome: match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(e) => AttemptOutcome::Failed(e.kind),
            },
            response_len: result.as_ref().map_or(0, String::len),
        };
        record.log();

        result
    }
}
