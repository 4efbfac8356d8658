//! Interruption Arbiter: decides whether a detected speech onset during
//! `ResponseGen`/`ResponseSpeak` counts as a barge-in, and bumps the
//! session epoch so stale in-flight LLM/TTS output is dropped (spec §4.8).

use eloquence_core::{Epoch, EpochCounter, Phase};

/// Decision returned for one VAD speech-onset event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterDecision {
    /// Not in an interruptible phase; ignore.
    Ignored,
    /// Accepted: cancel in-flight generation/synthesis, bump the epoch.
    Interrupt { new_epoch: Epoch },
}

pub struct InterruptionArbiter {
    epochs: EpochCounter,
}

impl InterruptionArbiter {
    pub fn new() -> Self {
        Self { epochs: EpochCounter::new() }
    }

    pub fn current_epoch(&self) -> Epoch {
        self.epochs.current()
    }

    /// Called when the VAD Gate confirms speech onset. Only ResponseGen and
    /// ResponseSpeak are interruptible (spec §4.8); anywhere else the event
    /// is ordinary turn-taking, not a barge-in.
    pub fn on_speech_onset(&self, phase: Phase) -> ArbiterDecision {
        if phase.interruptible() {
            ArbiterDecision::Interrupt { new_epoch: self.epochs.advance() }
        } else {
            ArbiterDecision::Ignored
        }
    }

    /// True if a result computed under `result_epoch` is still current and
    /// should be delivered; false if a later barge-in superseded it.
    pub fn is_result_current(&self, result_epoch: Epoch) -> bool {
        self.epochs.is_current(result_epoch)
    }
}

impl Default for InterruptionArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_onset_outside_interruptible_phases() {
        let arbiter = InterruptionArbiter::new();
        assert_eq!(arbiter.on_speech_onset(Phase::Listening), ArbiterDecision::Ignored);
    }

    #[test]
    fn interrupts_and_advances_epoch_during_response_gen() {
        let arbiter = InterruptionArbiter::new();
        let before = arbiter.current_epoch();
        let decision = arbiter.on_speech_onset(Phase::ResponseGen);
        match decision {
            ArbiterDecision::Interrupt { new_epoch } => assert!(new_epoch > before),
            ArbiterDecision::Ignored => panic!("expected interrupt"),
        }
    }

    #[test]
    fn stale_result_is_not_current_after_a_later_barge_in() {
        let arbiter = InterruptionArbiter::new();
        let stale = arbiter.current_epoch();
        arbiter.on_speech_onset(Phase::ResponseSpeak);
        assert!(!arbiter.is_result_current(stale));
    }
}
