//! Cooperative cancellation checks.
//!
//! A pool never interrupts a thread. Blocked acquires ask their
//! [`CancelCheck`] at every poll point and give up with
//! [`PoolError::Cancelled`](crate::PoolError::Cancelled) once it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;

/// Decides whether the work running on a thread should stop waiting.
pub trait CancelCheck: Send + Sync {
    /// Return `true` when `thread` should abandon its wait.
    fn is_cancelled(&self, thread: &Thread) -> bool;
}

impl<F> CancelCheck for F
where
    F: Fn(&Thread) -> bool + Send + Sync,
{
    fn is_cancelled(&self, thread: &Thread) -> bool {
        self(thread)
    }
}

/// A check that never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn is_cancelled(&self, _thread: &Thread) -> bool {
        false
    }
}

/// A shared flag that cancels every thread consulting it once raised.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Lower the flag so later waits run normally again.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl CancelCheck for CancellationFlag {
    fn is_cancelled(&self, _thread: &Thread) -> bool {
        self.is_raised()
    }
}
