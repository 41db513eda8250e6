//! Cross-stage run state.
//!
//! The single piece of shared mutable state in the pipeline: whether the
//! run is still accepting work. Stages poll it every loop iteration; queue
//! closure is the wake-up mechanism for stages parked on blocking calls.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct ReplicationState {
    cancelled: AtomicBool,
    failed: AtomicBool,
}

impl ReplicationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip to cancelled. One-way.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Record that a stage hit a terminal failure. One-way.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Stages exit their loops promptly once this is true.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.is_cancelled() || self.has_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_on_cancel_or_failure() {
        let state = ReplicationState::new();
        assert!(!state.should_abort());
        state.cancel();
        assert!(state.should_abort());
        assert!(state.is_cancelled());
        assert!(!state.has_failed());

        let state = ReplicationState::new();
        state.mark_failed();
        assert!(state.should_abort());
        assert!(!state.is_cancelled());
    }
}
