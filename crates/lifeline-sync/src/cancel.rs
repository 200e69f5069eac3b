//! Cooperative cancellation for drain loops.
//!
//! An `Arc<AtomicBool>` flag.  Loops such as
//! [`JoinableThread::run_loop`](crate::joinable::JoinableThread::run_loop)
//! poll it once per iteration; nothing is interrupted mid-callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation flag shared between the loop owner and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.  Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
