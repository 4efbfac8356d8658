//! Turn and emotion types (spec §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Learner,
    Agent,
}

/// Closed set of emotion labels a TTS delivery can be tagged with (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutre,
    Encouragement,
    Empathie,
    EnthousiasmeModere,
    Curiosite,
    Reflexion,
}

impl Emotion {
    /// Lexical fallback used when the LLM doesn't emit a parseable marker.
    pub fn from_heuristic(text: &str) -> Self {
        let trimmed = text.trim_end();
        if trimmed.ends_with('?') {
            Emotion::Curiosite
        } else if trimmed.ends_with('!') {
            Emotion::Encouragement
        } else {
            Emotion::Neutre
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Emotion::Neutre => "neutre",
            Emotion::Encouragement => "encouragement",
            Emotion::Empathie => "empathie",
            Emotion::EnthousiasmeModere => "enthousiasme_modere",
            Emotion::Curiosite => "curiosite",
            Emotion::Reflexion => "reflexion",
        };
        write!(f, "{}", s)
    }
}

/// Timestamps tracked across a single turn's lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTimings {
    pub speech_start: Option<DateTime<Utc>>,
    pub speech_end: Option<DateTime<Utc>>,
    pub first_response: Option<DateTime<Utc>>,
    pub last_response: Option<DateTime<Utc>>,
}

/// One speaker exchange. Immutable once committed to a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub audio_ref: Option<String>,
    pub timings: TurnTimings,
    pub emotion: Option<Emotion>,
    pub scenario_step_id: Option<String>,
    /// Set when this turn degraded (LLM timeout/error, TTS failure) so the
    /// Feedback Sink and transcript can distinguish canned fallbacks.
    pub degraded: bool,
    pub committed_at: DateTime<Utc>,
}

impl Turn {
    pub fn learner(text: impl Into<String>, speech_start: DateTime<Utc>, speech_end: DateTime<Utc>) -> Self {
        Self {
            role: TurnRole::Learner,
            text: text.into(),
            audio_ref: None,
            timings: TurnTimings {
                speech_start: Some(speech_start),
                speech_end: Some(speech_end),
                ..Default::default()
            },
            emotion: None,
            scenario_step_id: None,
            degraded: false,
            committed_at: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>, emotion: Emotion, scenario_step_id: Option<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            text: text.into(),
            audio_ref: None,
            timings: TurnTimings::default(),
            emotion: Some(emotion),
            scenario_step_id,
            degraded: false,
            committed_at: Utc::now(),
        }
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// The `(role, speech_start)` pair spec §3 requires to be unique
    /// within a session's history.
    pub fn identity_key(&self) -> (TurnRole, Option<DateTime<Utc>>) {
        (self.role, self.timings.speech_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_heuristic_matches_spec_fallback() {
        assert_eq!(Emotion::from_heuristic("Comment allez-vous?"), Emotion::Curiosite);
        assert_eq!(Emotion::from_heuristic("Bravo!"), Emotion::Encouragement);
        assert_eq!(Emotion::from_heuristic("Je comprends."), Emotion::Neutre);
    }

    #[test]
    fn display_matches_closed_label_set() {
        assert_eq!(Emotion::EnthousiasmeModere.to_string(), "enthousiasme_modere");
    }
}
