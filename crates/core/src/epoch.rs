//! Interruption epoch: a per-session monotonic counter that invalidates
//! stale pipeline outputs after a barge-in (spec §4.8, §5).

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, monotonically increasing generation number.
///
/// Every pipeline output (control frame, audio chunk) carries the epoch it
/// was produced under. The Transport drops anything whose epoch no longer
/// matches the session's current epoch instead of buffering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared, atomically-incrementing epoch counter owned by a Session.
#[derive(Debug, Default)]
pub struct EpochCounter(AtomicU64);

impl EpochCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Current epoch, for tagging outbound frames.
    pub fn current(&self) -> Epoch {
        Epoch(self.0.load(Ordering::SeqCst))
    }

    /// Atomically advance to the next epoch (barge-in). Returns the new value.
    pub fn advance(&self) -> Epoch {
        Epoch(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether a frame produced under `epoch` is still current.
    pub fn is_current(&self, epoch: Epoch) -> bool {
        epoch == self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic_and_exact() {
        let counter = EpochCounter::new();
        assert_eq!(counter.current(), Epoch::ZERO);
        assert_eq!(counter.advance(), Epoch(1));
        assert_eq!(counter.advance(), Epoch(2));
        assert_eq!(counter.current(), Epoch(2));
    }

    #[test]
    fn stale_epoch_detected() {
        let counter = EpochCounter::new();
        let e0 = counter.current();
        counter.advance();
        assert!(!counter.is_current(e0));
        assert!(counter.is_current(counter.current()));
    }
}
