//! Promotion check messages and the queue seams that carry them.
//!
//! A cancellation commits first, then enqueues a [`PromotionCheck`] for the
//! event. Delivery is at-least-once: a check can arrive twice, or arrive after
//! another worker already filled the freed capacity. Consumers must therefore
//! re-read WAITING status inside their own transaction before acting; a
//! duplicate then finds nothing to do.
//!
//! ```text
//! cancel ──commit──▶ enqueue(check) ──▶ [ queue ] ──▶ next_delivery ──▶ promote ──▶ ack
//!                                          ▲                                          │
//!                                          └──────── redelivered if never acked ◀─────┘
//! ```

use crate::types::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The backing service could not be reached.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// A message could not be encoded or decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The queue has been shut down and will yield no more messages.
    #[error("Queue closed")]
    Closed,
}

/// Why a promotion check was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionReason {
    /// A booking was cancelled and capacity may be free
    Cancellation,
    /// Periodic sweep covering missed signals
    Sweep,
    /// Operator-triggered
    Manual,
}

impl PromotionReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancellation => "cancellation",
            Self::Sweep => "sweep",
            Self::Manual => "manual",
        }
    }
}

/// Request to scan an event's waitlist for promotable entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionCheck {
    /// Event whose waitlist should be scanned
    pub event_id: EventId,
    /// Why the check was requested
    pub reason: PromotionReason,
    /// When the check was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl PromotionCheck {
    /// Build a check.
    #[must_use]
    pub const fn new(event_id: EventId, reason: PromotionReason, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            reason,
            enqueued_at,
        }
    }

    /// Encode for transport.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if serialization fails.
    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    /// Decode from transport.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the payload is not a valid check.
    pub fn from_json(payload: &str) -> Result<Self, QueueError> {
        serde_json::from_str(payload).map_err(|e| QueueError::Malformed(e.to_string()))
    }
}

/// A received check plus the handle needed to acknowledge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// The message
    pub check: PromotionCheck,
    /// Opaque acknowledgement handle (the raw payload for list-based queues)
    pub receipt: String,
}

/// Producer side of the promotion queue.
///
/// # Implementations
///
/// - `ChannelPromotionQueue` (in `seatkeeper-runtime`): in-process tokio channel
/// - `RedisPromotionQueue` (in `seatkeeper-redis`): reliable list queue across processes
pub trait PromotionQueue: Send + Sync {
    /// Enqueue a check.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Closed` if the message could not be queued.
    fn enqueue(
        &self,
        check: PromotionCheck,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}

/// Consumer side of the promotion queue.
pub trait PromotionSource: Send + Sync {
    /// Wait for the next delivery.
    ///
    /// Returns `Ok(None)` when nothing arrived within the implementation's
    /// poll window; callers simply ask again.
    ///
    /// # Errors
    ///
    /// Returns `Closed` once the queue will never yield again, `Unavailable`
    /// on transient backend failure.
    fn next_delivery(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, QueueError>> + Send + '_>>;

    /// Acknowledge a processed delivery so it is not redelivered.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on backend failure; the message will be redelivered.
    fn ack(
        &self,
        delivery: Delivery,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}
