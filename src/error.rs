//! Error types for commi modules using thiserror.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::commit::diff::Scope;

/// Errors from opening or reading the git repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not a git repository: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Repository at {path} has no working tree (bare repository)")]
    BareRepository { path: PathBuf },

    #[error("Failed to read repository state: {0}")]
    ReadFailed(#[source] git2::Error),
}

/// Errors from diff collection.
#[derive(Error, Debug)]
pub enum DiffError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("No {scope} changes to describe")]
    NoChanges { scope: Scope },
}

/// Errors from prompt construction.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error(
        "Prompt budget of {budget} characters is too small; the instructions alone need {required}"
    )]
    BudgetTooSmall { required: usize, budget: usize },
}

/// Classification of a failed generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    InvalidCredentials,
    RequestRejected,
    RateLimited,
    ServerError,
    Timeout,
    /// Quota used up with no hint of when it resets.
    QuotaExhausted,
    /// Response shape we could not classify.
    Unknown,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::InvalidCredentials => "InvalidCredentials",
            GenerationErrorKind::RequestRejected => "RequestRejected",
            GenerationErrorKind::RateLimited => "RateLimited",
            GenerationErrorKind::ServerError => "ServerError",
            GenerationErrorKind::Timeout => "Timeout",
            GenerationErrorKind::QuotaExhausted => "QuotaExhausted",
            GenerationErrorKind::Unknown => "Unknown",
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationErrorKind::RateLimited
                | GenerationErrorKind::ServerError
                | GenerationErrorKind::Timeout
        )
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed call to the generation endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    /// Delay the endpoint asked for before the next attempt.
    pub retry_after: Option<Duration>,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Errors from [`GenerationClient::send`](crate::llm::GenerationClient::send).
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("All {attempts} generation attempts failed. Last error: {last}")]
    Exhausted {
        attempts: u32,
        last: GenerationError,
    },
}

/// Errors from candidate parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Model response contained no usable commit message ({dropped} candidate(s) discarded)")]
    EmptyGeneration { dropped: usize },
}

/// Errors from building a [`Config`](crate::config::Config).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "No API key configured. Pass --api-key or set the GEMINI_API_KEY environment variable"
    )]
    MissingApiKey,

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Terminal failure of a pipeline run.
///
/// Each variant carries the component error unchanged.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(RepositoryError),

    #[error("No {scope} changes to describe. Stage or edit some files first.")]
    NoChanges { scope: Scope },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("Generation failed ({}): {}", .0.kind, .0.message)]
    Generation(GenerationError),

    #[error("Generation failed after {attempts} attempts ({}): {}", last.kind, last.message)]
    GenerationExhausted {
        attempts: u32,
        last: GenerationError,
    },

    #[error(transparent)]
    EmptyGeneration(ParseError),

    #[error("Generation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short category name for CLI rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Repository(_) => "RepositoryError",
            PipelineError::NoChanges { .. } => "NoChangesError",
            PipelineError::Prompt(_) => "PromptError",
            PipelineError::Generation(_) => "GenerationError",
            PipelineError::GenerationExhausted { .. } => "GenerationExhaustedError",
            PipelineError::EmptyGeneration(_) => "EmptyGenerationError",
            PipelineError::Cancelled => "Cancelled",
        }
    }

    /// The generation sub-kind, for generation failures.
    pub fn generation_kind(&self) -> Option<GenerationErrorKind> {
        match self {
            PipelineError::Generation(e) => Some(e.kind),
            PipelineError::GenerationExhausted { last, .. } => Some(last.kind),
            _ => None,
        }
    }
}

impl From<DiffError> for PipelineError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Repository(e) => PipelineError::Repository(e),
            DiffError::NoChanges { scope } => PipelineError::NoChanges { scope },
        }
    }
}

impl From<SendError> for PipelineError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Generation(e) => PipelineError::Generation(e),
            SendError::Exhausted { attempts, last } => {
                PipelineError::GenerationExhausted { attempts, last }
            }
        }
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        PipelineError::EmptyGeneration(err)
    }
}
