use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Counted wait, used as a write fence: a connection's close path blocks
/// until every in-flight request has been answered, bounded by a timeout.
#[derive(Debug, Default)]
pub struct Wait {
    count: AtomicI64,
    notify: Notify,
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, delta: i64) {
        self.count.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// Block until the count drains to zero or the timeout elapses.
    /// Returns `true` when the wait timed out.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count.load(Ordering::SeqCst) <= 0 {
                return false;
            }
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return true;
            }
        }
    }
}
