//! Reliable promotion queue on two Redis lists.
//!
//! ```text
//! enqueue: LPUSH pending
//! receive: LMOVE pending → processing   (message now owned by this consumer)
//! ack:     LREM processing
//! restart: everything left in processing goes back to pending
//! ```
//!
//! A consumer that dies between receive and ack leaves the message in
//! `processing`; [`RedisPromotionQueue::requeue_unacked`] on the next start
//! hands it out again. Promotion is idempotent, so redelivery is harmless.

use redis::aio::ConnectionManager;
use seatkeeper_core::Utc;
use seatkeeper_core::queue::{Delivery, PromotionCheck, PromotionQueue, PromotionSource, QueueError};
use seatkeeper_runtime::metrics::QueueMetrics;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const BACKEND: &str = "redis";

/// Promotion queue shared across processes.
#[derive(Clone)]
pub struct RedisPromotionQueue {
    conn: ConnectionManager,
    pending_key: String,
    processing_key: String,
    poll_interval: Duration,
}

impl RedisPromotionQueue {
    /// Create a queue under `prefix` (`{prefix}:pending`, `{prefix}:processing`).
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: &str) -> Self {
        Self {
            conn,
            pending_key: format!("{prefix}:pending"),
            processing_key: format!("{prefix}:processing"),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Sleep this long when a receive finds the queue empty.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Move every unacknowledged message back to pending, oldest first in line.
    ///
    /// Call once at consumer start-up, before any consumer of this queue is
    /// receiving.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on Redis failure.
    pub async fn requeue_unacked(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            let item: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing_key)
                .arg(&self.pending_key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::warn!(count = moved, "Requeued unacknowledged promotion checks");
        }
        Ok(moved)
    }

    /// Messages waiting to be received.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on Redis failure.
    pub async fn pending_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.pending_key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    /// Messages received but not yet acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on Redis failure.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.processing_key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn remove_from_processing(&self, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: redis::RedisError) -> QueueError {
    QueueMetrics::record_error(BACKEND);
    QueueError::Unavailable(e.to_string())
}

impl PromotionQueue for RedisPromotionQueue {
    fn enqueue(
        &self,
        check: PromotionCheck,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            let payload = check.to_json()?;
            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("LPUSH")
                .arg(&self.pending_key)
                .arg(&payload)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            QueueMetrics::record_enqueue(BACKEND);
            Ok(())
        })
    }
}

impl PromotionSource for RedisPromotionQueue {
    fn next_delivery(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, QueueError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            // Never BLMOVE here: the connection is multiplexed
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&self.pending_key)
                .arg(&self.processing_key)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            let Some(payload) = payload else {
                tokio::time::sleep(self.poll_interval).await;
                return Ok(None);
            };

            match PromotionCheck::from_json(&payload) {
                Ok(check) => {
                    let waited = (Utc::now() - check.enqueued_at).to_std().unwrap_or_default();
                    QueueMetrics::record_delivery(BACKEND, waited);
                    Ok(Some(Delivery {
                        check,
                        receipt: payload,
                    }))
                }
                Err(e) => {
                    tracing::error!(error = %e, payload = %payload, "Dropping malformed promotion check");
                    self.remove_from_processing(&payload).await?;
                    Err(e)
                }
            }
        })
    }

    fn ack(
        &self,
        delivery: Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move { self.remove_from_processing(&delivery.receipt).await })
    }
}
