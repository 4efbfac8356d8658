//! External VAD model contract (spec §4.2). The hysteresis/padding gate
//! logic that wraps this is in `eloquence-pipeline::vad`; this crate only
//! defines the contract the orchestrator depends on.

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::error::Result;

/// A single externally-hosted speech-probability model (Silero-class).
#[async_trait]
pub trait VadModel: Send + Sync + 'static {
    /// Instantaneous speech probability in `[0.0, 1.0]` for one 20ms frame.
    async fn speech_probability(&self, frame: &AudioFrame) -> Result<f32>;

    fn name(&self) -> &str;
}
