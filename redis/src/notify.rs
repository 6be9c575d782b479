//! Notifications published as JSON on Redis pub/sub.

use redis::aio::ConnectionManager;
use seatkeeper_core::notify::{Notification, Notifier, NotifyError};
use std::future::Future;
use std::pin::Pin;

/// Publishes each notification on `{prefix}:{kind}`.
///
/// Pub/sub is fire-and-forget: a notification published while no dispatcher
/// is subscribed is lost, which matches the notification contract.
#[derive(Clone)]
pub struct RedisNotifier {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisNotifier {
    /// Create a notifier publishing under `prefix`.
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Channel a notification is published on.
    #[must_use]
    pub fn channel_for(&self, notification: &Notification) -> String {
        format!("{}:{}", self.prefix, notification.kind())
    }
}

impl Notifier for RedisNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            let channel = self.channel_for(&notification);
            let payload = serde_json::to_string(&notification)
                .map_err(|e| NotifyError::Delivery(format!("encode: {e}")))?;

            let mut conn = self.conn.clone();
            let receivers: i64 = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(payload)
                .query_async(&mut conn)
                .await
                .map_err(|e| NotifyError::Delivery(format!("PUBLISH {channel}: {e}")))?;

            tracing::debug!(channel = %channel, receivers, "Notification published");
            Ok(())
        })
    }
}
