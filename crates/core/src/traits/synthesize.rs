//! TTS RPC contract (spec §4.7 step 3).

use async_trait::async_trait;

use crate::cancellation::CancellationHandle;
use crate::error::Result;
use crate::turn::Emotion;

/// One complete synthesized payload as returned by the TTS RPC, before the
/// pipeline re-chunks it into ≤100ms frames.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub pcm16: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u8,
}

/// External TTS RPC contract. The TTS Pipeline (eloquence-pipeline) owns
/// segmentation, caching, chunking and pacing around this call.
#[async_trait]
pub trait Synthesize: Send + Sync + 'static {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_id: &str,
        emotion: Emotion,
        cancellation: CancellationHandle,
    ) -> Result<SynthesizedAudio>;

    fn name(&self) -> &str;
}
