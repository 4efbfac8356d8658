//! Process-wide TTS cache (spec §3 TTS Cache Entry, §4.7 step 4, §5 shared
//! resources). Backed by a `DashMap` so reads never block and writes only
//! serialize per shard/key, matching the "many concurrent reads, writes
//! serialize per key only" requirement without a single global lock.
//!
//! Grounded on the teacher's `SessionStore`/`SimulatedAssetPriceService`
//! store-trait-plus-concrete-impl idiom (`ScyllaSessionStore` in
//! `server/src/session.rs`, `gold_price.rs`), generalized from an external
//! database to an in-process map since the spec mandates no on-disk cache
//! layout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eloquence_core::SynthesizedAudio;
use eloquence_pipeline::TtsCache;

/// Below this compression ratio (compressed/uncompressed), or above this
/// payload size, a write-back is worth compressing (spec §4.7 step 4).
const COMPRESSION_RATIO_THRESHOLD: f64 = 0.9;
const COMPRESSION_SIZE_FLOOR_BYTES: usize = 4096;
const ZSTD_LEVEL: i32 = 3;

struct CacheEntry {
    payload: Vec<u8>,
    is_compressed: bool,
    sample_rate: u32,
    channels: u8,
    created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}

pub struct InMemoryTtsCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl InMemoryTtsCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl TtsCache for InMemoryTtsCache {
    async fn get(&self, key: &str) -> Option<SynthesizedAudio> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            self.entries.remove(key);
            tracing::debug!(key, "tts cache entry expired");
            return None;
        }
        let pcm16 = if entry.is_compressed {
            match zstd::stream::decode_all(entry.payload.as_slice()) {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(key, %error, "tts cache entry failed to decompress");
                    return None;
                }
            }
        } else {
            entry.payload.clone()
        };
        tracing::debug!(key, "tts cache hit");
        Some(SynthesizedAudio { pcm16, sample_rate: entry.sample_rate, channels: entry.channels })
    }

    async fn put(&self, key: &str, audio: &SynthesizedAudio) {
        let uncompressed_len = audio.pcm16.len();
        let compressed = zstd::stream::encode_all(audio.pcm16.as_slice(), ZSTD_LEVEL).ok();

        let (payload, is_compressed) = match compressed {
            Some(bytes) => {
                let ratio = bytes.len() as f64 / uncompressed_len.max(1) as f64;
                if ratio <= COMPRESSION_RATIO_THRESHOLD || uncompressed_len >= COMPRESSION_SIZE_FLOOR_BYTES {
                    (bytes, true)
                } else {
                    (audio.pcm16.clone(), false)
                }
            }
            None => (audio.pcm16.clone(), false),
        };

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                is_compressed,
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                created_at: Utc::now(),
            },
        );
        tracing::debug!(key, is_compressed, "tts cache write-back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(bytes: Vec<u8>) -> SynthesizedAudio {
        SynthesizedAudio { pcm16: bytes, sample_rate: 16000, channels: 1 }
    }

    #[tokio::test]
    async fn round_trips_bit_identical_payload() {
        let cache = InMemoryTtsCache::new(Duration::from_secs(86400));
        let original = audio(vec![7u8; 5000]);
        cache.put("k1", &original).await;
        let fetched = cache.get("k1").await.expect("cache hit");
        assert_eq!(fetched.pcm16, original.pcm16);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = InMemoryTtsCache::new(Duration::from_secs(86400));
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_miss() {
        let cache = InMemoryTtsCache::new(Duration::from_millis(0));
        cache.put("k1", &audio(vec![1, 2, 3, 4])).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn small_incompressible_payload_is_stored_raw_but_still_round_trips() {
        let cache = InMemoryTtsCache::new(Duration::from_secs(86400));
        let tiny = audio(vec![9u8; 8]);
        cache.put("k1", &tiny).await;
        let fetched = cache.get("k1").await.expect("cache hit");
        assert_eq!(fetched.pcm16, tiny.pcm16);
    }
}
