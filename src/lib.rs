//! commi - A CLI tool that generates commit messages from pending git changes.
//!
//! # Overview
//!
//! commi collects the staged and/or unstaged diff of a repository, renders it
//! into a size-bounded prompt, asks Gemini for several commit message
//! alternatives, and parses the reply into ranked candidates.

pub mod commit;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;

// Re-export commonly used types
pub use commit::{Candidate, Scope, StyleOptions};
pub use config::{Config, Credentials};
pub use error::{
    ConfigError, DiffError, GenerationError, GenerationErrorKind, ParseError, PipelineError,
    PromptError, RepositoryError, SendError,
};
pub use pipeline::Pipeline;
