//! Post-commit notification dispatch.

use crate::metrics;
use seatkeeper_core::notify::{Notification, Notifier};
use seatkeeper_runtime::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sends notifications on spawned tasks with bounded retry.
///
/// Callers never wait on delivery and never see its failure; a notification
/// that still fails after the last attempt is logged and counted.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    /// Three attempts, starting at 200ms.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_policy(
            notifier,
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(5))
                .build(),
        )
    }

    /// Dispatcher with a custom retry policy.
    #[must_use]
    pub const fn with_policy(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self { notifier, policy }
    }

    /// Send `notification` in the background.
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let policy = self.policy.clone();

        tokio::spawn(async move {
            let kind = notification.kind();
            let event_id = notification.event_id();
            let result = retry_with_backoff(policy, || notifier.notify(notification.clone())).await;

            match result {
                Ok(()) => tracing::debug!(kind, event_id = %event_id, "Notification sent"),
                Err(e) => {
                    metrics::record_notification_failed(kind);
                    tracing::error!(kind, event_id = %event_id, error = %e, "Notification dropped");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatkeeper_core::environment::Clock;
    use seatkeeper_core::{Booking, EventId, RequesterId};
    use seatkeeper_testing::{RecordingNotifier, test_clock};

    fn fast(notifier: Arc<RecordingNotifier>) -> NotificationDispatcher {
        NotificationDispatcher::with_policy(
            notifier,
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .jitter(0.0)
                .build(),
        )
    }

    fn confirmed() -> Notification {
        Notification::BookingConfirmed {
            booking: Booking::confirmed(EventId::new(), RequesterId::new(), 1, test_clock().now()),
        }
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(2);

        fast(notifier.clone()).dispatch(confirmed()).await.unwrap();

        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(5);

        fast(notifier.clone()).dispatch(confirmed()).await.unwrap();

        assert_eq!(notifier.attempts(), 3);
        assert!(notifier.notifications().is_empty());
    }
}
