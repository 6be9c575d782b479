//! In-process promotion queue over a tokio channel.
//!
//! Used when the API and the promotion worker run in the same process, and in
//! tests. Delivery is at-most-once across a crash (the channel is memory), so
//! the periodic sweep is what covers checks lost that way.

use crate::metrics::QueueMetrics;
use seatkeeper_core::queue::{Delivery, PromotionCheck, PromotionQueue, PromotionSource, QueueError};
use seatkeeper_core::Utc;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

const BACKEND: &str = "channel";

/// Unbounded channel implementing both ends of the promotion queue.
pub struct ChannelPromotionQueue {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<PromotionCheck>>>,
    rx: Mutex<mpsc::UnboundedReceiver<PromotionCheck>>,
    poll_interval: Duration,
}

impl ChannelPromotionQueue {
    /// Create a queue whose consumer waits at most `poll_interval` per call.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            poll_interval,
        }
    }

    /// Stop accepting checks. Already queued checks are still delivered,
    /// after which the consumer sees `Closed`.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<PromotionCheck>, QueueError> {
        self.tx
            .lock()
            .map_err(|_| QueueError::Unavailable("channel sender poisoned".to_string()))?
            .clone()
            .ok_or(QueueError::Closed)
    }
}

impl Default for ChannelPromotionQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl PromotionQueue for ChannelPromotionQueue {
    fn enqueue(
        &self,
        check: PromotionCheck,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            self.sender()?.send(check).map_err(|_| QueueError::Closed)?;
            QueueMetrics::record_enqueue(BACKEND);
            Ok(())
        })
    }
}

impl PromotionSource for ChannelPromotionQueue {
    fn next_delivery(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, QueueError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(self.poll_interval, rx.recv()).await {
                Err(_) => Ok(None),
                Ok(None) => Err(QueueError::Closed),
                Ok(Some(check)) => {
                    let waited = (Utc::now() - check.enqueued_at).to_std().unwrap_or_default();
                    QueueMetrics::record_delivery(BACKEND, waited);
                    let receipt = check.event_id.to_string();
                    Ok(Some(Delivery { check, receipt }))
                }
            }
        })
    }

    fn ack(
        &self,
        _delivery: Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        // Received means removed
        Box::pin(async { Ok(()) })
    }
}
