//! A cooperative shutdown flag shared between the scheduler thread, the
//! worker pool, and both IPC listeners.
//!
//! This is deliberately a flat `Arc<AtomicBool>` plus a `Notify`-style
//! wakeup rather than a cancellation-token hierarchy: every consumer in this
//! workspace shuts down flat (there is one process, one shutdown signal),
//! so the extra structure a tree of tokens buys elsewhere isn't needed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Sets the flag and wakes every task parked in [`Self::cancelled`].
    /// Idempotent: firing twice is a no-op on the second call.
    pub fn fire(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::fire`] has been called. Safe to call
    /// concurrently from multiple tasks; `notify_waiters` wakes all of them.
    pub async fn cancelled(&self) {
        if self.is_fired() {
            return;
        }
        self.notify.notified().await;
    }
}
