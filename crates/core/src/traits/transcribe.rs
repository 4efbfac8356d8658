//! ASR Client contract (spec §4.3).

use async_trait::async_trait;

use crate::cancellation::CancellationHandle;
use crate::error::Result;
use crate::segment::SpeechSegment;

/// Per-word timing returned alongside a transcript.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u32,
    pub end_ms: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Transcript {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub detected_language: String,
    pub confidence: f32,
}

/// Stateless-per-call ASR contract. Implementations are external RPC
/// clients; the orchestrator depends only on this trait (spec §9: "Dynamic
/// dispatch over TTS/LLM/ASR providers").
#[async_trait]
pub trait Transcribe: Send + Sync + 'static {
    /// Transcribe a completed Speech Segment.
    ///
    /// Callers are responsible for the non-empty guard (spec §4.3): segments
    /// failing `SpeechSegment::is_too_small` must never reach this method.
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
        cancellation: CancellationHandle,
    ) -> Result<Transcript>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use crate::cancellation::CancellationSource;

    struct MockAsr;

    #[async_trait]
    impl Transcribe for MockAsr {
        async fn transcribe(
            &self,
            _segment: &SpeechSegment,
            language: &str,
            _cancellation: CancellationHandle,
        ) -> Result<Transcript> {
            Ok(Transcript {
                text: "bonjour".into(),
                words: vec![],
                detected_language: language.to_string(),
                confidence: 0.9,
            })
        }

        fn name(&self) -> &str {
            "mock-asr"
        }
    }

    #[tokio::test]
    async fn trait_object_is_usable_through_dyn() {
        let asr: Box<dyn Transcribe> = Box::new(MockAsr);
        let (source, _rx) = CancellationSource::new();
        let segment = crate::segment::SpeechSegment {
            pcm16: vec![0u8; 4000],
            sample_rate: crate::audio::SampleRate::Hz16000,
            channels: crate::audio::Channels::Mono,
            encoding: crate::audio::AudioEncoding::Pcm16,
            duration: std::time::Duration::from_millis(500),
            rms_energy_db: -20.0,
        };
        let result = asr.transcribe(&segment, "fr", source.handle(Epoch::ZERO)).await.unwrap();
        assert_eq!(result.text, "bonjour");
    }
}
