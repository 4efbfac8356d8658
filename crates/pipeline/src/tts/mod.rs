//! TTS Pipeline: segments agent text, checks the cache, synthesizes cache
//! misses, and dispatches audio chunks to the transport layer (spec §4.7).
//!
//! Grounded on the teacher's `StreamingTts` word/chunk streaming idiom
//! (`tts/streaming.rs`), trimmed of ONNX-session bookkeeping since the
//! synthesis model itself is an external RPC here, and with barge-in
//! driven by [`eloquence_core::CancellationHandle`] instead of a
//! `Mutex<bool>` flag.

mod segment;

pub use segment::split_into_chunks;

use std::sync::Arc;

use async_trait::async_trait;
use eloquence_core::{CancellationHandle, Emotion, Error, Result, Synthesize, SynthesizedAudio};

/// Cache port the TTS Pipeline depends on; implemented by
/// `eloquence-persistence`'s on-disk/process-wide TTS cache.
#[async_trait]
pub trait TtsCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<SynthesizedAudio>;
    async fn put(&self, key: &str, audio: &SynthesizedAudio);
}

/// No dispatched audio frame exceeds this many milliseconds (spec §4.7
/// stage 3, §6 "Outbound audio: frames of ≤100 ms").
const MAX_FRAME_MS: u64 = 100;
const BYTES_PER_SAMPLE: u64 = 2;

/// Splits one synthesized payload into consecutive frames of at most
/// [`MAX_FRAME_MS`], each still a complete multiple of the sample frame
/// size (`channels * 2` bytes) so no sample is split across a frame.
fn split_audio_frames(audio: &SynthesizedAudio, max_ms: u64) -> Vec<SynthesizedAudio> {
    let frame_bytes = (audio.channels as u64).max(1) * BYTES_PER_SAMPLE;
    let samples_per_chunk = ((audio.sample_rate as u64 * max_ms) / 1000).max(1);
    let max_bytes = (samples_per_chunk * frame_bytes).max(frame_bytes) as usize;

    if audio.pcm16.is_empty() {
        return vec![SynthesizedAudio { pcm16: Vec::new(), sample_rate: audio.sample_rate, channels: audio.channels }];
    }

    audio
        .pcm16
        .chunks(max_bytes)
        .map(|bytes| SynthesizedAudio { pcm16: bytes.to_vec(), sample_rate: audio.sample_rate, channels: audio.channels })
        .collect()
}

/// `hash(language, voice, emotion, normalized_text)` per spec §3/§4.7.
pub fn cache_key(language: &str, voice_id: &str, emotion: Emotion, text: &str) -> String {
    use std::hash::{Hash, Hasher};
    let normalized = text.trim().to_lowercase();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    (language, voice_id, emotion.to_string(), normalized).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub struct TtsPipeline {
    model: Arc<dyn Synthesize>,
    cache: Option<Arc<dyn TtsCache>>,
}

/// One dispatched unit of synthesized audio, ordered by `chunk_index`.
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub chunk_index: usize,
    pub text: String,
    pub audio: SynthesizedAudio,
    pub is_final: bool,
    pub from_cache: bool,
}

impl TtsPipeline {
    pub fn new(model: Arc<dyn Synthesize>, cache: Option<Arc<dyn TtsCache>>) -> Self {
        Self { model, cache }
    }

    /// Synthesizes `text` chunk-by-chunk, yielding each chunk as it becomes
    /// ready. Stops early (returning what was produced so far) if
    /// `cancellation` fires mid-stream, for barge-in (spec §4.8).
    pub async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_id: &str,
        emotion: Emotion,
        mut cancellation: CancellationHandle,
    ) -> Result<Vec<TtsChunk>> {
        let units = split_into_chunks(text);
        let mut results = Vec::new();
        let mut chunk_index = 0usize;

        for (unit_index, unit_text) in units.iter().enumerate() {
            if cancellation.is_cancelled() {
                break;
            }

            let key = cache_key(language, voice_id, emotion, unit_text);
            let (audio, from_cache) = if let Some(cached) = self.lookup_cache(&key).await {
                (cached, true)
            } else {
                let synth = tokio::select! {
                    result = self.model.synthesize(unit_text, language, voice_id, emotion, cancellation.clone()) => result?,
                    _ = cancellation.cancelled() => return Ok(results),
                };
                self.write_back_cache(&key, &synth).await;
                (synth, false)
            };

            let is_last_unit = unit_index + 1 == units.len();
            let frames = split_audio_frames(&audio, MAX_FRAME_MS);
            let last_frame = frames.len().saturating_sub(1);
            for (frame_index, frame) in frames.into_iter().enumerate() {
                results.push(TtsChunk {
                    chunk_index,
                    text: unit_text.clone(),
                    audio: frame,
                    is_final: is_last_unit && frame_index == last_frame,
                    from_cache,
                });
                chunk_index += 1;
            }
        }

        Ok(results)
    }

    async fn lookup_cache(&self, key: &str) -> Option<SynthesizedAudio> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    async fn write_back_cache(&self, key: &str, audio: &SynthesizedAudio) {
        if let Some(cache) = &self.cache {
            cache.put(key, audio).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eloquence_core::{CancellationSource, Epoch};
    use std::sync::Mutex as StdMutex;

    struct EchoSynth;

    #[async_trait]
    impl Synthesize for EchoSynth {
        async fn synthesize(
            &self,
            text: &str,
            _language: &str,
            _voice_id: &str,
            _emotion: Emotion,
            _cancellation: CancellationHandle,
        ) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio { pcm16: text.as_bytes().to_vec(), sample_rate: 16000, channels: 1 })
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    struct InMemoryCache(StdMutex<std::collections::HashMap<String, SynthesizedAudio>>);

    #[async_trait]
    impl TtsCache for InMemoryCache {
        async fn get(&self, key: &str) -> Option<SynthesizedAudio> {
            self.0.lock().unwrap().get(key).cloned()
        }
        async fn put(&self, key: &str, audio: &SynthesizedAudio) {
            self.0.lock().unwrap().insert(key.to_string(), audio.clone());
        }
    }

    #[tokio::test]
    async fn synthesizes_all_chunks_when_not_cancelled() {
        let pipeline = TtsPipeline::new(Arc::new(EchoSynth), None);
        let (source, _rx) = CancellationSource::new();
        let chunks = pipeline
            .synthesize("Bonjour. Comment allez-vous?", "fr", "v1", Emotion::Neutre, source.handle(Epoch::ZERO))
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.last().unwrap().is_final);
    }

    #[tokio::test]
    async fn second_call_hits_cache() {
        let cache = Arc::new(InMemoryCache(StdMutex::new(std::collections::HashMap::new())));
        let pipeline = TtsPipeline::new(Arc::new(EchoSynth), Some(cache.clone() as Arc<dyn TtsCache>));
        let (source, _rx) = CancellationSource::new();
        pipeline.synthesize("Bonjour.", "fr", "v1", Emotion::Neutre, source.handle(Epoch::ZERO)).await.unwrap();
        let chunks = pipeline.synthesize("Bonjour.", "fr", "v1", Emotion::Neutre, source.handle(Epoch::ZERO)).await.unwrap();
        assert!(chunks[0].from_cache);
    }
}
