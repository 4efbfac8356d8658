//! Stateful wrapper around the pure [`eloquence_core::session::transition`]
//! table: tracks the current phase, checkpoints it for observability, and
//! rejects events the table doesn't define (spec §4.9).
//!
//! The checkpoint/metrics idiom is grounded on the teacher's
//! `ConversationFSM` (an async trait wrapping a pure transition function
//! with hooks for persistence and metrics); the transition table itself is
//! plain data, so this wrapper stays synchronous.

use eloquence_core::{transition, Phase, PhaseEvent};
use tracing::{info, warn};

/// One recorded phase change, for the session transcript/metrics.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub from: Phase,
    pub event: PhaseEvent,
    pub to: Phase,
}

pub struct SessionFsm {
    current: Phase,
    history: Vec<Checkpoint>,
}

impl SessionFsm {
    pub fn new() -> Self {
        Self { current: Phase::Idle, history: Vec::new() }
    }

    pub fn phase(&self) -> Phase {
        self.current
    }

    pub fn history(&self) -> &[Checkpoint] {
        &self.history
    }

    /// Applies `event`. Returns `false` without mutating state if the
    /// transition table has no entry for `(current, event)`.
    pub fn apply(&mut self, event: PhaseEvent) -> bool {
        match transition(self.current, event) {
            Some(next) => {
                info!(from = %self.current, to = %next, ?event, "session phase transition");
                self.history.push(Checkpoint { from: self.current, event, to: next });
                self.current = next;
                true
            }
            None => {
                warn!(phase = %self.current, ?event, "ignored undefined phase transition");
                false
            }
        }
    }

    pub fn is_interruptible(&self) -> bool {
        self.current.interruptible()
    }

    pub fn is_ended(&self) -> bool {
        self.current.is_terminal()
    }
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}
