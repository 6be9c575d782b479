//! Capturing doubles for the notifier and the promotion queue.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use seatkeeper_core::notify::{Notification, Notifier, NotifyError};
use seatkeeper_core::queue::{PromotionCheck, PromotionQueue, QueueError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Notifier that records every accepted notification.
///
/// Can be told to fail a number of upcoming sends, to exercise retry and
/// the "failed notification never rolls back" rule.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Notifications accepted so far, in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Send attempts so far, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` notifications were accepted or `timeout`
    /// elapses; returns what was recorded.
    ///
    /// Dispatch happens on spawned tasks, so tests poll instead of asserting
    /// right after the call that triggered it.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.notifications();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(NotifyError::Delivery("injected failure".to_string()));
            }
            self.sent.lock().unwrap().push(notification);
            Ok(())
        })
    }
}

/// Promotion queue that only records what was enqueued.
#[derive(Default)]
pub struct RecordingPromotionQueue {
    checks: Mutex<Vec<PromotionCheck>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingPromotionQueue {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enqueue fail with `Unavailable` until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Checks enqueued so far, in order.
    #[must_use]
    pub fn checks(&self) -> Vec<PromotionCheck> {
        self.checks.lock().unwrap().clone()
    }
}

impl PromotionQueue for RecordingPromotionQueue {
    fn enqueue(
        &self,
        check: PromotionCheck,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(QueueError::Unavailable("injected failure".to_string()));
            }
            self.checks.lock().unwrap().push(check);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seatkeeper_core::queue::PromotionReason;
    use seatkeeper_core::{Booking, EventId, RequesterId};

    #[tokio::test]
    async fn notifier_fails_requested_number_of_times() {
        let notifier = RecordingNotifier::new();
        notifier.fail_next(2);
        let booking = Booking::confirmed(EventId::new(), RequesterId::new(), 1, Utc::now());

        for _ in 0..2 {
            let n = Notification::BookingConfirmed { booking: booking.clone() };
            assert!(notifier.notify(n).await.is_err());
        }
        notifier
            .notify(Notification::BookingConfirmed { booking })
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn queue_records_checks() {
        let queue = RecordingPromotionQueue::new();
        let check = PromotionCheck::new(EventId::new(), PromotionReason::Cancellation, Utc::now());
        queue.enqueue(check.clone()).await.unwrap();
        assert_eq!(queue.checks(), vec![check.clone()]);

        queue.set_failing(true);
        assert!(queue.enqueue(check).await.is_err());
        assert_eq!(queue.checks().len(), 1);
    }
}
