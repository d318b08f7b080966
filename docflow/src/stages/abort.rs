//! Cooperative abort signal raised at a stage's soft deadline.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    aborted: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

/// A signal a running stage body can poll or await to stop early.
///
/// Aborting is idempotent; only the first reason is kept. Clones share state.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    /// Creates a signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal and wakes every waiter.
    pub fn abort(&self, reason: impl Into<String>) {
        if self
            .inner
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.inner.reason.write() = Some(reason.into());
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns whether the signal has fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Returns the abort reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Completes once the signal has fired.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_clear() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        assert!(signal.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let signal = AbortSignal::new();
        signal.abort("soft deadline");
        signal.abort("second");

        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some("soft deadline".to_string()));
    }

    #[tokio::test]
    async fn test_aborted_wakes_waiter() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move {
            waiter.aborted().await;
            waiter.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort("stop");

        let reason = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, Some("stop".to_string()));
    }

    #[tokio::test]
    async fn test_aborted_returns_immediately_when_fired() {
        let signal = AbortSignal::new();
        signal.abort("already");

        tokio_test::assert_ready!(tokio_test::task::spawn(signal.aborted()).poll());
    }
}
