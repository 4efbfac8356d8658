//! ASR Client: wraps an externally-hosted transcription model, enforcing
//! the non-empty-segment guard and applying cancellation/retry (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use eloquence_core::{CancellationHandle, Error, SpeechSegment, Transcribe, Transcript};

use crate::PipelineError;

#[derive(Debug, Clone)]
pub struct AsrClientConfig {
    pub language: String,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for AsrClientConfig {
    fn default() -> Self {
        Self {
            language: "fr".to_string(),
            max_retries: 1,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

pub struct AsrClient {
    model: Arc<dyn Transcribe>,
    config: AsrClientConfig,
}

impl AsrClient {
    pub fn new(model: Arc<dyn Transcribe>, config: AsrClientConfig) -> Self {
        Self { model, config }
    }

    /// Transcribes one speech segment. Rejects segments too small to carry
    /// speech before making any upstream call (spec §4.3 edge case).
    pub async fn transcribe(
        &self,
        segment: &SpeechSegment,
        mut cancellation: CancellationHandle,
    ) -> Result<Transcript, PipelineError> {
        if segment.is_too_small() {
            return Err(PipelineError::Asr("segment too small to transcribe".into()));
        }

        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if cancellation.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                }
                backoff *= 2;
            }

            let result = tokio::select! {
                result = self.model.transcribe(segment, &self.config.language, cancellation.clone()) => result,
                _ = cancellation.cancelled() => return Err(PipelineError::Cancelled),
            };

            match result {
                Ok(transcript) => return Ok(transcript),
                // Transport-layer failures get one retry; anything else
                // (a transcription-layer error) surfaces immediately.
                Err(Error::Transport(message)) => {
                    if attempt == self.config.max_retries {
                        return Err(PipelineError::Asr(message));
                    }
                    tracing::warn!(attempt, %message, "asr transport error, retrying");
                }
                Err(e) => return Err(PipelineError::Asr(e.to_string())),
            }
        }

        unreachable!("loop always returns before exhausting its range")
    }
}
