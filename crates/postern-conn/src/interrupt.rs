//! User interrupt token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cancellation token shared by every connection of a session.
///
/// The token is checked at read, write and poll boundaries only. Once
/// triggered it stays set until [`Interrupt::clear`] is called, so the caller
/// decides when to resume.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<Inner>);

impl Interrupt {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an interrupt and wakes every waiting operation.
    pub fn trigger(&self) {
        self.0.requested.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// Returns true if an interrupt was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    /// Withdraws the request.
    pub fn clear(&self) {
        self.0.requested.store(false, Ordering::SeqCst);
    }

    /// Completes once an interrupt is requested.
    pub async fn triggered(&self) {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let interrupt = Interrupt::new();
        let waiter = interrupt.clone();
        let task = tokio::spawn(async move { waiter.triggered().await });

        tokio::task::yield_now().await;
        interrupt.trigger();
        let joined = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(joined, Ok(Ok(()))), "waiter was not woken");
        assert!(interrupt.is_triggered());

        interrupt.clear();
        assert!(!interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_already_triggered_returns_immediately() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let result = tokio::time::timeout(Duration::from_millis(100), interrupt.triggered()).await;
        assert!(result.is_ok(), "should not wait");
    }
}
