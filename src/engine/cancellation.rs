//! Cooperative cancellation handle for an in-flight flow run.
//!
//! Mirrors the engine's cooperative-cancellation idiom elsewhere: a shared
//! `Arc<AtomicBool>`, flipped by `cancel()` and observed by the worker and the
//! flow itself via polling rather than a notify primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A clonable handle that signals cancellation of one flow run.
#[derive(Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once `cancel()` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The shared flag, for handing to a [`crate::flow::FlowRunContext`].
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed_on_clones() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
