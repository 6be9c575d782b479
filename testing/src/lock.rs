//! Single-process [`LockCoordinator`] with clock-driven expiry.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seatkeeper_core::environment::Clock;
use seatkeeper_core::lock::{LockCoordinator, LockError, LockKey, LockToken};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Held {
    token: LockToken,
    expires_at: DateTime<Utc>,
}

/// In-memory lock coordinator.
///
/// Expiry is evaluated against the injected [`Clock`], so tests can step past
/// a TTL with a [`crate::ManualClock`] instead of sleeping.
pub struct InMemoryLockCoordinator {
    clock: Arc<dyn Clock>,
    held: Mutex<HashMap<String, Held>>,
    unavailable: AtomicBool,
    acquisitions: AtomicUsize,
}

impl InMemoryLockCoordinator {
    /// Create a coordinator reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            held: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether `key` is currently held by anyone.
    #[must_use]
    pub fn is_held(&self, key: &LockKey) -> bool {
        let now = self.clock.now();
        self.held
            .lock()
            .unwrap()
            .get(&key.to_string())
            .is_some_and(|h| h.expires_at > now)
    }

    /// Successful acquisitions so far.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LockError::Unavailable("in-memory lock coordinator marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockToken, LockError> {
        self.check_available()?;
        let now = self.clock.now();
        let name = key.to_string();
        let mut held = self.held.lock().unwrap();

        if held.get(&name).is_some_and(|h| h.expires_at > now) {
            return Err(LockError::AlreadyLocked(name));
        }

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let token = LockToken::generate();
        held.insert(
            name,
            Held {
                token: token.clone(),
                expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<(), LockError> {
        self.check_available()?;
        let now = self.clock.now();
        let name = key.to_string();
        let mut held = self.held.lock().unwrap();

        match held.get(&name) {
            None => Err(LockError::Expired(name)),
            Some(h) if h.expires_at <= now => {
                held.remove(&name);
                Err(LockError::Expired(name))
            }
            Some(h) if &h.token != token => Err(LockError::InvalidToken(name)),
            Some(_) => {
                held.remove(&name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use seatkeeper_core::{EventId, RequesterId};

    fn setup() -> (Arc<ManualClock>, InMemoryLockCoordinator, LockKey) {
        let clock = Arc::new(ManualClock::default());
        let locks = InMemoryLockCoordinator::new(Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, locks, LockKey::new(EventId::new(), RequesterId::new()))
    }

    #[tokio::test]
    async fn second_acquire_is_rejected_until_release() {
        let (_clock, locks, key) = setup();
        let ttl = Duration::from_secs(5);

        let token = locks.acquire(&key, ttl).await.unwrap();
        assert!(matches!(locks.acquire(&key, ttl).await, Err(LockError::AlreadyLocked(_))));

        locks.release(&key, &token).await.unwrap();
        assert!(locks.acquire(&key, ttl).await.is_ok());
    }

    #[tokio::test]
    async fn lock_expires_after_ttl() {
        let (clock, locks, key) = setup();
        let token = locks.acquire(&key, Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(6));
        assert!(!locks.is_held(&key));
        assert!(locks.acquire(&key, Duration::from_secs(5)).await.is_ok());
        // Stale holder cannot release the new holder's lock
        assert!(matches!(
            locks.release(&key, &token).await,
            Err(LockError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn release_after_expiry_reports_expired() {
        let (clock, locks, key) = setup();
        let token = locks.acquire(&key, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(matches!(locks.release(&key, &token).await, Err(LockError::Expired(_))));
    }

    #[tokio::test]
    async fn unavailable_coordinator_fails_fast() {
        let (_clock, locks, key) = setup();
        locks.set_unavailable(true);
        assert!(matches!(
            locks.acquire(&key, Duration::from_secs(1)).await,
            Err(LockError::Unavailable(_))
        ));
    }
}
