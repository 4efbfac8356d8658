//! Feedback Sink: at session end (or per-turn) serializes the learner's
//! audio buffer, reference text, and scenario context to disk and enqueues
//! a scoring job (spec §4.10, §6 Persisted state layout).
//!
//! Write is fire-and-forget with at-least-once semantics; the caller never
//! awaits disk I/O completion. Downstream de-duplication is by
//! `(session_id, turn_index)` (spec §4.10) — writing the same key twice
//! simply overwrites the same path, so retries are naturally idempotent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eloquence_core::{Emotion, SessionId};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

/// One finalized learner turn handed to the Feedback Sink for scoring.
#[derive(Debug, Clone)]
pub struct FeedbackArtifact {
    pub session_id: SessionId,
    pub turn_index: u32,
    pub pcm16: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub reference_text: String,
    pub scenario_step_id: Option<String>,
    pub emotion: Option<Emotion>,
    pub recorded_at: DateTime<Utc>,
}

/// The JSON scoring-job descriptor written alongside the WAV artifact.
#[derive(Debug, Serialize, Deserialize)]
struct ScoringJob {
    session_id: SessionId,
    turn_index: u32,
    audio_path: String,
    reference_text: String,
    scenario_step_id: Option<String>,
    emotion: Option<Emotion>,
    recorded_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Submits `artifact` for scoring. Returns once the write has been
    /// scheduled, not once it completes — callers must not block the
    /// session's hot path on disk I/O.
    async fn submit(&self, artifact: FeedbackArtifact);
}

pub struct FilesystemFeedbackSink {
    audio_root: PathBuf,
    feedback_root: PathBuf,
}

impl FilesystemFeedbackSink {
    pub fn new(audio_root: impl Into<PathBuf>, feedback_root: impl Into<PathBuf>) -> Self {
        Self { audio_root: audio_root.into(), feedback_root: feedback_root.into() }
    }

    fn audio_path(&self, session_id: &str, turn_index: u32) -> PathBuf {
        self.audio_root.join(session_id).join(format!("{turn_index}.wav"))
    }

    fn feedback_path(&self, session_id: &str, turn_index: u32) -> PathBuf {
        self.feedback_root.join(session_id).join(format!("{turn_index}.json"))
    }

    fn write_sync(&self, artifact: &FeedbackArtifact) -> Result<(), PersistenceError> {
        let audio_path = self.audio_path(&artifact.session_id, artifact.turn_index);
        write_wav(&audio_path, &artifact.pcm16, artifact.sample_rate, artifact.channels)?;

        let feedback_path = self.feedback_path(&artifact.session_id, artifact.turn_index);
        let job = ScoringJob {
            session_id: artifact.session_id.clone(),
            turn_index: artifact.turn_index,
            audio_path: audio_path.display().to_string(),
            reference_text: artifact.reference_text.clone(),
            scenario_step_id: artifact.scenario_step_id.clone(),
            emotion: artifact.emotion,
            recorded_at: artifact.recorded_at,
        };
        if let Some(parent) = feedback_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&job)?;
        std::fs::write(&feedback_path, bytes)?;
        Ok(())
    }
}

fn write_wav(path: &Path, pcm16: &[u8], sample_rate: u32, channels: u16) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|error| PersistenceError::Io(error.to_string()))?;
    for frame in pcm16.chunks_exact(2) {
        let sample = i16::from_le_bytes([frame[0], frame[1]]);
        writer.write_sample(sample).map_err(|error| PersistenceError::Io(error.to_string()))?;
    }
    writer.finalize().map_err(|error| PersistenceError::Io(error.to_string()))?;
    Ok(())
}

#[async_trait::async_trait]
impl FeedbackSink for FilesystemFeedbackSink {
    async fn submit(&self, artifact: FeedbackArtifact) {
        let audio_root = self.audio_root.clone();
        let feedback_root = self.feedback_root.clone();
        let sink = FilesystemFeedbackSink { audio_root, feedback_root };
        tokio::task::spawn_blocking(move || {
            if let Err(error) = sink.write_sync(&artifact) {
                tracing::warn!(
                    session_id = %artifact.session_id,
                    turn_index = artifact.turn_index,
                    %error,
                    "failed to persist feedback artifact"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(session_id: &str, turn_index: u32) -> FeedbackArtifact {
        FeedbackArtifact {
            session_id: session_id.to_string(),
            turn_index,
            pcm16: vec![0u8; 3200],
            sample_rate: 16000,
            channels: 1,
            reference_text: "Bonjour, je m'appelle Marie.".to_string(),
            scenario_step_id: Some("presentation".to_string()),
            emotion: Some(Emotion::Encouragement),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_wav_and_json_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemFeedbackSink::new(dir.path().join("audio"), dir.path().join("feedback"));
        let a = artifact("sess-1", 0);
        sink.write_sync(&a).unwrap();

        let wav_path = dir.path().join("audio").join("sess-1").join("0.wav");
        let json_path = dir.path().join("feedback").join("sess-1").join("0.json");
        assert!(wav_path.exists());
        assert!(json_path.exists());

        let reader = hound::WavReader::open(&wav_path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
    }

    #[tokio::test]
    async fn repeated_submit_for_same_turn_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemFeedbackSink::new(dir.path().join("audio"), dir.path().join("feedback"));
        sink.write_sync(&artifact("sess-1", 0)).unwrap();
        sink.write_sync(&artifact("sess-1", 0)).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("audio").join("sess-1")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
