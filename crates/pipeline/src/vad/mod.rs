//! VAD Gate: hysteresis wrapper around an externally-hosted speech
//! probability model (spec §4.2). Buffers padding frames around a detected
//! utterance and degrades to an energy threshold if the model call fails.
//!
//! Grounded on the teacher's `SileroVad` hysteresis state machine
//! (`Silence -> SpeechStart -> Speech -> SpeechEnd -> Silence`), adapted
//! from a sync ONNX call to an async [`eloquence_core::traits::VadModel`]
//! call since model inference is an external non-goal here.

use std::sync::Arc;

use eloquence_core::{AudioFrame, VadModel};
use parking_lot::Mutex;

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Silence,
    SpeechStart,
    Speech,
    SpeechEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Silence,
    PotentialSpeechStart,
    SpeechConfirmed,
    SpeechContinue,
    PotentialSpeechEnd,
    SpeechEnd,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub threshold: f32,
    pub min_speech_frames: usize,
    pub min_silence_frames: usize,
    pub speech_pad_ms: u32,
    pub frame_ms: u32,
    /// Energy floor (dB) used when the model call itself fails.
    pub energy_floor_db: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.45,
            min_speech_frames: 8,
            min_silence_frames: 63, // ~2000ms at 32ms frames, spec default min_silence_duration_ms
            speech_pad_ms: 400,
            frame_ms: 32,
            energy_floor_db: -50.0,
        }
    }
}

impl GateConfig {
    pub fn pad_frames(&self) -> usize {
        (self.speech_pad_ms / self.frame_ms.max(1)) as usize
    }
}

struct GateMutableState {
    state: GateState,
    speech_frames: usize,
    silence_frames: usize,
    model_degraded: bool,
}

/// Stateful per-session VAD gate. One instance per active session.
pub struct VadGate {
    model: Arc<dyn VadModel>,
    config: GateConfig,
    inner: Mutex<GateMutableState>,
}

impl VadGate {
    pub fn new(model: Arc<dyn VadModel>, config: GateConfig) -> Self {
        Self {
            model,
            config,
            inner: Mutex::new(GateMutableState {
                state: GateState::Silence,
                speech_frames: 0,
                silence_frames: 0,
                model_degraded: false,
            }),
        }
    }

    /// Process one frame. Falls back to an energy-threshold heuristic if the
    /// external model call errors (spec §4.2 Failure path), flagging the
    /// frame so the caller can mark the resulting turn as degraded.
    pub async fn process_frame(
        &self,
        frame: &AudioFrame,
    ) -> Result<(GateState, f32, GateEvent, bool), PipelineError> {
        let (probability, degraded) = match self.model.speech_probability(frame).await {
            Ok(p) => (p, false),
            Err(e) => {
                tracing::warn!(error = %e, "vad model call failed, degrading to energy threshold");
                let prob = if frame.energy_db > self.config.energy_floor_db { 1.0 } else { 0.0 };
                (prob, true)
            }
        };

        let is_speech = probability >= self.config.threshold;
        let mut inner = self.inner.lock();
        if degraded {
            inner.model_degraded = true;
        }
        let (state, event) = self.transition(&mut inner, is_speech);
        Ok((state, probability, event, inner.model_degraded))
    }

    fn transition(&self, state: &mut GateMutableState, is_speech: bool) -> (GateState, GateEvent) {
        let event = match (state.state, is_speech) {
            (GateState::Silence, true) => {
                state.state = GateState::SpeechStart;
                state.speech_frames = 1;
                GateEvent::PotentialSpeechStart
            }
            (GateState::SpeechStart, true) => {
                state.speech_frames += 1;
                if state.speech_frames >= self.config.min_speech_frames {
                    state.state = GateState::Speech;
                    GateEvent::SpeechConfirmed
                } else {
                    GateEvent::PotentialSpeechStart
                }
            }
            (GateState::SpeechStart, false) => {
                state.state = GateState::Silence;
                state.speech_frames = 0;
                GateEvent::Silence
            }
            (GateState::Speech, true) => {
                state.silence_frames = 0;
                GateEvent::SpeechContinue
            }
            (GateState::Speech, false) => {
                state.state = GateState::SpeechEnd;
                state.silence_frames = 1;
                GateEvent::PotentialSpeechEnd
            }
            (GateState::SpeechEnd, true) => {
                state.state = GateState::Speech;
                state.silence_frames = 0;
                GateEvent::SpeechContinue
            }
            (GateState::SpeechEnd, false) => {
                state.silence_frames += 1;
                if state.silence_frames >= self.config.min_silence_frames {
                    state.state = GateState::Silence;
                    state.speech_frames = 0;
                    state.silence_frames = 0;
                    GateEvent::SpeechEnd
                } else {
                    GateEvent::PotentialSpeechEnd
                }
            }
            (GateState::Silence, false) => GateEvent::Silence,
        };
        (state.state, event)
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = GateState::Silence;
        inner.speech_frames = 0;
        inner.silence_frames = 0;
        inner.model_degraded = false;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use eloquence_core::{Channels, Error, Result, SampleRate};

    use super::*;

    struct FixedProbModel(f32);

    #[async_trait]
    impl VadModel for FixedProbModel {
        async fn speech_probability(&self, _frame: &AudioFrame) -> Result<f32> {
            Ok(self.0)
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl VadModel for FailingModel {
        async fn speech_probability(&self, _frame: &AudioFrame) -> Result<f32> {
            Err(Error::Upstream("boom".into()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn frame(energy_db: f32) -> AudioFrame {
        let mut f = AudioFrame::new(vec![0.1f32; 512], SampleRate::Hz16000, Channels::Mono, 0);
        f.energy_db = energy_db;
        f
    }

    #[tokio::test]
    async fn confirms_speech_after_min_frames() {
        let gate = VadGate::new(Arc::new(FixedProbModel(0.9)), GateConfig { min_speech_frames: 3, ..Default::default() });
        let (_, _, e1, _) = gate.process_frame(&frame(-10.0)).await.unwrap();
        assert_eq!(e1, GateEvent::PotentialSpeechStart);
        gate.process_frame(&frame(-10.0)).await.unwrap();
        let (state, _, e3, _) = gate.process_frame(&frame(-10.0)).await.unwrap();
        assert_eq!(e3, GateEvent::SpeechConfirmed);
        assert_eq!(state, GateState::Speech);
    }

    #[tokio::test]
    async fn degrades_to_energy_threshold_on_model_failure() {
        let gate = VadGate::new(Arc::new(FailingModel), GateConfig::default());
        let (_, _, _, degraded) = gate.process_frame(&frame(-10.0)).await.unwrap();
        assert!(degraded);
    }
}
