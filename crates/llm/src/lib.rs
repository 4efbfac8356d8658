//! LLM Client: HTTP generation backend for the Dialogue Manager (spec §4.6).
//!
//! Single OpenAI-compatible backend (works against a hosted model or a
//! local vLLM/Ollama OpenAI-compat endpoint) with retry/backoff, streaming,
//! and cooperative cancellation via [`eloquence_core::CancellationHandle`].

pub mod backend;
pub mod prompt;

pub use backend::{FinishReason, GenerationResult, LlmBackend, LlmClientConfig, OpenAIBackend};
pub use prompt::{fallback_phrase, Message, PromptBuilder, Role};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<LlmError> for eloquence_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => eloquence_core::Error::Validation(msg),
            LlmError::Cancelled => eloquence_core::Error::Cancelled,
            LlmError::Timeout => eloquence_core::Error::Timeout,
            other => eloquence_core::Error::Upstream(other.to_string()),
        }
    }
}
