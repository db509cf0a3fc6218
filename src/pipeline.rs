//! End-to-end generation: diff, prompt, request, parse.

use std::future::Future;
use std::path::Path;

use tracing::{info, warn};

use crate::commit::diff::{DiffCollector, Scope};
use crate::commit::message::{Candidate, CandidateParser};
use crate::commit::prompt::{PromptBuilder, StyleOptions};
use crate::config::{Config, Credentials};
use crate::error::PipelineError;
use crate::llm::{GeminiTransport, GenerationClient, RetryPolicy, Transport};

/// Owns the configured components for one or more generation runs.
///
/// Holds no mutable state; independent calls may run concurrently.
pub struct Pipeline<T = GeminiTransport> {
    config: Config,
    collector: DiffCollector,
    builder: PromptBuilder,
    client: GenerationClient<T>,
}

impl Pipeline<GeminiTransport> {
    /// Pipeline talking to the configured Gemini endpoint.
    pub fn new(config: Config) -> Self {
        let transport = GeminiTransport::new(&config.endpoint, &config.model);
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Pipeline<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        let policy = config.retry_policy();
        Self::with_retry_policy(config, transport, policy)
    }

    /// Like [`Pipeline::with_transport`] with an explicit retry policy.
    pub fn with_retry_policy(config: Config, transport: T, policy: RetryPolicy) -> Self {
        Self {
            collector: DiffCollector::new(config.max_diff_bytes),
            builder: PromptBuilder::new(config.max_prompt_chars),
            client: GenerationClient::new(transport, policy, config.verbose),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Generate ranked commit message candidates for the pending changes.
    pub async fn generate(
        &self,
        repo_path: &Path,
        scope: Scope,
        style: &StyleOptions,
        credentials: &Credentials,
    ) -> Result<Vec<Candidate>, PipelineError> {
        self.generate_until(repo_path, scope, style, credentials, std::future::pending())
            .await
    }

    /// Like [`Pipeline::generate`], but gives up as soon as `shutdown` resolves.
    ///
    /// The in-flight request is dropped on cancellation and no partial result
    /// is returned.
    pub async fn generate_until<F>(
        &self,
        repo_path: &Path,
        scope: Scope,
        style: &StyleOptions,
        credentials: &Credentials,
        shutdown: F,
    ) -> Result<Vec<Candidate>, PipelineError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(repo_path, scope, style, credentials) => result,
            () = shutdown => {
                info!("Generation cancelled");
                Err(PipelineError::Cancelled)
            }
        }
    }

    async fn run(
        &self,
        repo_path: &Path,
        scope: Scope,
        style: &StyleOptions,
        credentials: &Credentials,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let bundle = self.collector.collect(repo_path, scope)?;
        info!(
            files = bundle.file_count(),
            bytes = bundle.total_size,
            truncated = bundle.truncated,
            %scope,
            "Collected changes"
        );

        let prompt = self.builder.build(&bundle, style)?;
        info!(
            chars = prompt.text.chars().count(),
            files_included = prompt.files_included,
            files_omitted = prompt.files_omitted,
            "Built prompt"
        );

        let parser = CandidateParser::new(style.max_subject_length);
        let mut empty_retries = self.config.empty_retries;

        loop {
            let raw = self
                .client
                .send(&prompt, credentials, self.config.timeout)
                .await?;

            match parser.parse(&raw) {
                Ok(candidates) => {
                    info!(count = candidates.len(), "Generated commit message candidates");
                    return Ok(candidates);
                }
                Err(e) if empty_retries > 0 => {
                    empty_retries -= 1;
                    warn!(
                        error = %e,
                        remaining = empty_retries,
                        "No usable candidate, asking again"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::prompt::PromptSpec;
    use crate::error::{GenerationError, GenerationErrorKind, ParseError};
    use crate::llm::client::MockTransport;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> Config {
        Config::new("test-key")
    }

    fn credentials() -> Credentials {
        Credentials::new("test-key")
    }

    fn repo_with_change() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        dir
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_changes_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();

        let mut mock = MockTransport::new();
        mock.expect_call().times(0);

        let pipeline = Pipeline::with_transport(config(), mock);
        let result = pipeline
            .generate(dir.path(), Scope::All, &StyleOptions::default(), &credentials())
            .await;

        assert!(matches!(result, Err(PipelineError::NoChanges { scope: Scope::All })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTransport::new();
        mock.expect_call().times(0);

        let pipeline = Pipeline::with_transport(config(), mock);
        let result = pipeline
            .generate(dir.path(), Scope::Staged, &StyleOptions::default(), &credentials())
            .await;

        assert!(matches!(result, Err(PipelineError::Repository(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_returns_ranked_candidates() {
        let dir = repo_with_change();
        let mut mock = MockTransport::new();
        mock.expect_call()
            .withf(|prompt: &PromptSpec, _| prompt.text.contains("main.rs"))
            .times(1)
            .returning(|_, _| Ok("1. Add main entry point\n2. Create binary skeleton".to_string()));

        let pipeline = Pipeline::with_transport(config(), mock);
        let candidates = pipeline
            .generate(dir.path(), Scope::All, &StyleOptions::default(), &credentials())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].subject, "Add main entry point");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_generation_is_retried_once() {
        let dir = repo_with_change();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let mut mock = MockTransport::new();
        mock.expect_call().times(2).returning(move |_, _| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok("```\n```".to_string())
            } else {
                Ok("Add main entry point".to_string())
            }
        });

        let pipeline = Pipeline::with_transport(config(), mock);
        let candidates = pipeline
            .generate(dir.path(), Scope::All, &StyleOptions::default(), &credentials())
            .await
            .unwrap();

        assert_eq!(candidates[0].subject, "Add main entry point");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_generation_surfaces_after_retry() {
        let dir = repo_with_change();
        let mut mock = MockTransport::new();
        mock.expect_call().times(2).returning(|_, _| Ok(String::new()));

        let pipeline = Pipeline::with_transport(config(), mock);
        let result = pipeline
            .generate(dir.path(), Scope::All, &StyleOptions::default(), &credentials())
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::EmptyGeneration(ParseError::EmptyGeneration { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_errors_keep_their_kind() {
        let dir = repo_with_change();
        let mut mock = MockTransport::new();
        mock.expect_call().times(3).returning(|_, _| {
            Err(GenerationError::new(GenerationErrorKind::ServerError, "overloaded"))
        });

        let pipeline = Pipeline::with_transport(config(), mock);
        let result = pipeline
            .generate(dir.path(), Scope::All, &StyleOptions::default(), &credentials())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationExhausted { attempts: 3, .. }));
        assert_eq!(err.generation_kind(), Some(GenerationErrorKind::ServerError));
    }

    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn call(&self, _: &PromptSpec, _: &Credentials) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("Add main entry point".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_in_flight_request() {
        let dir = repo_with_change();
        let pipeline = Pipeline::with_transport(config(), StalledTransport);

        let result = pipeline
            .generate_until(
                dir.path(),
                Scope::All,
                &StyleOptions::default(),
                &credentials(),
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }
}
