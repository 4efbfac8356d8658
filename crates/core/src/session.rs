//! Session identity and the pipeline-phase state machine (spec §3, §4.9).

use serde::{Deserialize, Serialize};

/// Opaque, ULID-like session identifier.
pub type SessionId = String;

pub fn new_session_id() -> SessionId {
    ulid::Ulid::new().to_string()
}

/// Current stage of the per-session pipeline (spec §4.9).
///
/// `Idle -> Listening -> Transcribing -> ResponseGen -> ResponseSpeak -> Listening`,
/// terminating in `Ended` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    ResponseGen,
    ResponseSpeak,
    Ended,
}

impl Phase {
    /// Whether a `barge_in` event is actionable from this phase (§4.8: only
    /// ResponseGen and ResponseSpeak can be interrupted).
    pub fn interruptible(&self) -> bool {
        matches!(self, Phase::ResponseGen | Phase::ResponseSpeak)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ended)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Transcribing => "transcribing",
            Phase::ResponseGen => "response_gen",
            Phase::ResponseSpeak => "response_speak",
            Phase::Ended => "ended",
        };
        write!(f, "{}", s)
    }
}

/// Events that drive phase transitions, mirrored 1:1 from the transition
/// table in spec §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    StartStream,
    SpeechEnd,
    AsrSuccess,
    AsrFailOrCancel,
    LlmFinal,
    TtsDone,
    BargeIn,
    StopStream,
    IdleTimeout,
    TransportClose,
}

/// Pure transition function for the table in spec §4.9. Returns `None` for
/// an event that has no defined transition from `from` (caller should
/// ignore it rather than treat it as an error, mirroring a state machine
/// that only reacts to events valid for its current state).
pub fn transition(from: Phase, event: PhaseEvent) -> Option<Phase> {
    use Phase::*;
    use PhaseEvent::*;
    match (from, event) {
        (Idle, StartStream) => Some(Listening),
        (Listening, SpeechEnd) => Some(Transcribing),
        (Listening, StopStream) | (Listening, IdleTimeout) => Some(Ended),
        (Transcribing, AsrSuccess) => Some(ResponseGen),
        (Transcribing, AsrFailOrCancel) => Some(Listening),
        (ResponseGen, LlmFinal) => Some(ResponseSpeak),
        (ResponseGen, BargeIn) => Some(Listening),
        (ResponseSpeak, TtsDone) => Some(Listening),
        (ResponseSpeak, BargeIn) => Some(Listening),
        (_, TransportClose) => Some(Ended),
        _ => None,
    }
}
