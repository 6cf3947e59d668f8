//! Caller-owned run control: immediate cancel and graceful stop.
//!
//! The two mechanisms are independent. Cancelling preempts the running agent
//! process; stopping is only honored once the current iteration has completed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Immediate-cancel signal observed by the agent process wait loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Graceful-stop flag, checked only at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    requested: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Both signals for one orchestrator run. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub stop: StopFlag,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the running agent and end the run.
    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }

    /// Finish the current iteration, then end the run.
    pub fn stop_after_current(&self) {
        self.stop.request();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_signals() {
        let control = RunControl::new();
        let handle = control.clone();
        assert!(!control.is_cancelled());
        assert!(!control.stop_requested());

        handle.stop_after_current();
        assert!(control.stop_requested());
        assert!(!control.is_cancelled());

        handle.cancel_now();
        assert!(control.is_cancelled());
    }
}
