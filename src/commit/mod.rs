//! Commit message generation: pending changes in, ranked messages out.

pub mod diff;
pub mod message;
pub mod prompt;

pub use diff::{ChangeHunk, ChangeKind, DiffBundle, DiffCollector, Scope};
pub use message::{Candidate, CandidateParser, LintIssue, lint};
pub use prompt::{PromptBuilder, PromptSpec, StyleOptions, Tone, sanitize_diff};
