//! Short-lived named locks for rejecting duplicate in-flight submissions.
//!
//! A lock is keyed by `(event_id, requester_id)` and expires on its own after a
//! TTL, so a crashed holder can never wedge a requester. This is a latency
//! optimization only: the store's per-event row lock is what prevents
//! overselling, and the booking coordinator stays correct with no lock
//! coordinator at all.

use crate::types::{EventId, RequesterId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by a [`LockCoordinator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another holder owns the key and its TTL has not elapsed.
    #[error("Already locked: {0}")]
    AlreadyLocked(String),

    /// The key is held, but under a different token.
    #[error("Invalid lock token for {0}")]
    InvalidToken(String),

    /// The key is no longer held (TTL elapsed before release).
    #[error("Lock expired: {0}")]
    Expired(String),

    /// The backing service could not be reached.
    #[error("Lock coordinator unavailable: {0}")]
    Unavailable(String),
}

/// Lock name for one requester's submission against one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// Event being booked
    pub event_id: EventId,
    /// Requester submitting
    pub requester_id: RequesterId,
}

impl LockKey {
    /// Build a key.
    #[must_use]
    pub const fn new(event_id: EventId, requester_id: RequesterId) -> Self {
        Self {
            event_id,
            requester_id,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "booking-lock:{}:{}", self.event_id, self.requester_id)
    }
}

/// Proof of ownership handed out by [`LockCoordinator::acquire`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Auto-expiring named lock service.
///
/// # Implementations
///
/// - `RedisLockCoordinator` (in `seatkeeper-redis`): `SET NX PX` plus a
///   compare-and-delete script, shared across service instances
/// - `InMemoryLockCoordinator` (in `seatkeeper-testing`): single process
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Take the lock for `ttl`.
    ///
    /// # Errors
    ///
    /// - `AlreadyLocked`: someone else holds an unexpired lock on `key`
    /// - `Unavailable`: backing service failure
    async fn acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockToken, LockError>;

    /// Release a lock previously acquired with `token`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken`: the key is held under another token
    /// - `Expired`: the key is no longer held
    /// - `Unavailable`: backing service failure
    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<(), LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_is_stable() {
        let key = LockKey::new(EventId::new(), RequesterId::new());
        let rendered = key.to_string();
        assert!(rendered.starts_with("booking-lock:"));
        assert!(rendered.contains(&key.event_id.to_string()));
        assert!(rendered.ends_with(&key.requester_id.to_string()));
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(LockToken::generate(), LockToken::generate());
    }
}
