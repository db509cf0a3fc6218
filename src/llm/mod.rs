//! Talking to the text-generation endpoint.

pub mod client;
pub mod gemini;
pub mod retry;

pub use client::{AttemptOutcome, GenerationAttempt, GenerationClient, Transport};
pub use gemini::GeminiTransport;
pub use retry::{RetryPolicy, retry_with_backoff};
