//! Audio pipeline: the VAD Gate, ASR Client, and TTS Pipeline sit between
//! the transport layer and the Dialogue Manager (spec §2, §4.2, §4.3, §4.7).

pub mod asr;
pub mod clients;
pub mod tts;
pub mod vad;

pub use asr::{AsrClient, AsrClientConfig};
pub use clients::{AsrHttpClient, TtsHttpClient, VadHttpClient};
pub use tts::{cache_key, TtsCache, TtsChunk, TtsPipeline};
pub use vad::{GateConfig, GateEvent, GateState, VadGate};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("asr: {0}")]
    Asr(String),

    #[error("tts: {0}")]
    Tts(String),

    #[error("vad: {0}")]
    Vad(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<PipelineError> for eloquence_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => eloquence_core::Error::Cancelled,
            other => eloquence_core::Error::Upstream(other.to_string()),
        }
    }
}

impl From<eloquence_core::Error> for PipelineError {
    fn from(err: eloquence_core::Error) -> Self {
        match err {
            eloquence_core::Error::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Asr(other.to_string()),
        }
    }
}
