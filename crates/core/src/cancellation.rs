//! Cooperative cancellation handles for RPC clients (ASR/LLM/TTS).
//!
//! The teacher workspace never reaches for `tokio_util::sync::CancellationToken`;
//! its shutdown signaling is hand-rolled on top of `tokio::sync::watch`
//! (see `SessionManager::start_cleanup_task`). This follows the same idiom:
//! a `watch` channel carrying a generation counter doubles as both the
//! "cancel now" signal and the interruption epoch the call was issued under.

use tokio::sync::watch;

use crate::epoch::Epoch;

/// Handed to an RPC client at call time; cleared by the caller (directly, or
/// via an epoch bump) to request cooperative cancellation.
#[derive(Clone)]
pub struct CancellationHandle {
    issued_under: Epoch,
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    pub fn new(issued_under: Epoch, rx: watch::Receiver<bool>) -> Self {
        Self { issued_under, rx }
    }

    /// The epoch this call was issued under. Callers compare this against
    /// the session's current epoch to detect staleness without waiting on
    /// the cancellation signal.
    pub fn issued_under(&self) -> Epoch {
        self.issued_under
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as cancellation is requested. RPC clients `select!`
    /// this against their I/O future so cancellation is observed at the
    /// next I/O boundary (≤100 ms per spec §4.3/§4.6).
    pub async fn cancelled(&mut self) {
        // A watch whose sender is already dropped (session torn down) still
        // has a readable value; only bail out if it's already true.
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Owned by the Session; `fire()` cancels every outstanding handle derived
/// from this source for the current epoch.
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Create a fresh handle for a new call, resetting the cancelled flag.
    pub fn handle(&self, issued_under: Epoch) -> CancellationHandle {
        let rx = self.tx.subscribe();
        CancellationHandle::new(issued_under, rx)
    }

    /// Request cancellation of all handles subscribed to this source.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }

    /// Reset for reuse by the next call (e.g. resuming Listening after a
    /// barge-in cancelled the in-flight LLM/TTS call).
    pub fn reset(&self) {
        let _ = self.tx.send(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_wakes_pending_waiters_within_bound() {
        let (source, _rx) = CancellationSource::new();
        let mut handle = source.handle(Epoch::ZERO);
        assert!(!handle.is_cancelled());

        let waiter = tokio::spawn(async move {
            handle.cancelled().await;
            handle.is_cancelled()
        });

        source.fire();
        let was_cancelled = tokio::time::timeout(std::time::Duration::from_millis(100), waiter)
            .await
            .expect("cancellation observed within 100ms")
            .unwrap();
        assert!(was_cancelled);
    }

    #[test]
    fn reset_allows_reuse() {
        let (source, _rx) = CancellationSource::new();
        source.fire();
        let handle = source.handle(Epoch::ZERO);
        assert!(handle.is_cancelled());
        source.reset();
        let handle = source.handle(Epoch::ZERO);
        assert!(!handle.is_cancelled());
    }
}
