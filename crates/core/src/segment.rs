//! Speech Segment: a committed window of learner audio (spec §3).

use std::time::Duration;

use crate::audio::{AudioEncoding, Channels, SampleRate};

/// A contiguous window of learner audio between a VAD `speech_start` and
/// `speech_end` event. Discarded after the resulting transcription is bound
/// to a Turn.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// PCM 16-bit mono, 16 kHz, including VAD padding.
    pub pcm16: Vec<u8>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    pub encoding: AudioEncoding,
    pub duration: Duration,
    pub rms_energy_db: f32,
}

impl SpeechSegment {
    pub fn byte_len(&self) -> usize {
        self.pcm16.len()
    }

    /// Non-empty guard from spec §4.3: segments under 200ms or 400 bytes
    /// fail fast with `SegmentTooSmall`, no RPC issued.
    pub fn is_too_small(&self) -> bool {
        self.duration < Duration::from_millis(200) || self.pcm16.len() < 400
    }
}
