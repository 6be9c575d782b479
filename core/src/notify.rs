//! Outbound notifications.
//!
//! Notifications are fire-and-forget: they are sent after the transaction that
//! produced them has committed, and a failed send is logged but never rolls
//! anything back. Rendering and delivery transport belong to the dispatcher on
//! the other side of [`Notifier`].

use crate::types::{Booking, EventId, WaitlistEntry};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Notification delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The dispatcher rejected or never received the notification.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Something a requester should hear about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A booking was confirmed on the request path
    BookingConfirmed {
        /// The confirmed booking
        booking: Booking,
    },
    /// A booking was cancelled
    BookingCancelled {
        /// The cancelled booking
        booking: Booking,
    },
    /// A waitlist entry was converted into a booking
    WaitlistPromoted {
        /// The promoted entry
        entry: WaitlistEntry,
        /// The booking created for it
        booking: Booking,
    },
}

impl Notification {
    /// Label used in logs, metrics and pub/sub channel names.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BookingConfirmed { .. } => "booking_confirmed",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::WaitlistPromoted { .. } => "waitlist_promoted",
        }
    }

    /// Event the notification concerns.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::BookingConfirmed { booking }
            | Self::BookingCancelled { booking }
            | Self::WaitlistPromoted { booking, .. } => booking.event_id,
        }
    }
}

/// Notification dispatcher.
///
/// # Implementations
///
/// - [`LogNotifier`]: writes a structured log line
/// - `RedisNotifier` (in `seatkeeper-redis`): publishes JSON on a pub/sub channel
/// - `RecordingNotifier` (in `seatkeeper-testing`): captures for assertions
pub trait Notifier: Send + Sync {
    /// Hand a notification to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `Delivery` if the dispatcher could not accept it.
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Notifier that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                kind = notification.kind(),
                event_id = %notification.event_id(),
                "Notification dispatched"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RequesterId;
    use chrono::Utc;

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let booking = Booking::confirmed(EventId::new(), RequesterId::new(), 1, Utc::now());
        let notification = Notification::BookingConfirmed { booking };
        assert_eq!(notification.kind(), "booking_confirmed");
        LogNotifier.notify(notification).await.unwrap();
    }

    #[test]
    fn serialized_notification_is_tagged() {
        let booking = Booking::confirmed(EventId::new(), RequesterId::new(), 1, Utc::now());
        let event_id = booking.event_id;
        let notification = Notification::BookingCancelled { booking };
        assert_eq!(notification.event_id(), event_id);

        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("\"kind\":\"booking_cancelled\""));
    }
}
