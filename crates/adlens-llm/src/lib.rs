//! OpenAI-compatible model client.
//!
//! Chat completions (optionally with one inline JPEG image) and audio
//! transcription uploads, with bounded timeouts and retry on transient
//! failures.

pub mod client;
pub mod error;
mod types;

pub use client::{CompletionRequest, LlmClient, LlmConfig, TranscriptionRequest};
pub use error::{LlmError, LlmResult};
