//! Capability contracts the orchestrator depends on instead of concrete
//! providers (spec §9: "Dynamic dispatch over TTS/LLM/ASR providers").

pub mod synthesize;
pub mod transcribe;
pub mod vad;

pub use synthesize::{Synthesize, SynthesizedAudio};
pub use transcribe::{Transcribe, Transcript, WordTiming};
pub use vad::VadModel;
