//! A per-turn cancellation handle, shared by every suspension point named in SPEC_FULL §5:
//! upstream streaming reads, tool executor dispatch, and event-store appends. Plain
//! `Arc`-backed state rather than a process-wide flag, per the "explicit cancellation
//! contexts over global flags" design note.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signals cancellation to every clone of this handle. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Safe to await repeatedly or concurrently.
    ///
    /// `enable()`s the waiter before checking the flag, so a `cancel()` landing between the
    /// check and the await is never missed (`Notify::notify_waiters` only wakes waiters
    /// already registered at call time; it leaves no permit for latecomers, unlike
    /// `notify_one`).
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
