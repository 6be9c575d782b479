//! Booking Coordinator: create and cancel bookings.
//!
//! # Create
//!
//! ```text
//! validate quantity
//!   → acquire duplicate-submission lock (best effort)
//!   → begin ─ reserve (inventory row lock) ─ insert booking ─ commit
//!   → release lock
//!   → notify BookingConfirmed (background)
//! ```
//!
//! # Cancel
//!
//! ```text
//! begin ─ lock booking ─ CONFIRMED → CANCELLED ─ release capacity ─ commit
//!   → enqueue PromotionCheck(Cancellation)
//!   → notify BookingCancelled (background)
//! ```
//!
//! Row locks are always taken booking → inventory → waitlist entry. Opening
//! the transaction and its reads and writes, lock waits included, are bounded
//! by the configured timeout; a timed-out transaction is dropped, which rolls
//! it back. The commit itself runs outside the deadline: once it has been
//! sent, the caller always learns its real outcome.
//!
//! The lock coordinator only rejects duplicate in-flight submissions. If it
//! is missing or unreachable, bookings proceed and the inventory row lock
//! alone keeps the count exact.

use crate::config::BookingSettings;
use crate::dispatch::NotificationDispatcher;
use crate::environment::BookingEnvironment;
use crate::ledger::CapacityLedger;
use crate::metrics;
use seatkeeper_core::lock::{LockError, LockKey, LockToken};
use seatkeeper_core::notify::Notification;
use seatkeeper_core::queue::{PromotionCheck, PromotionReason};
use seatkeeper_core::store::StoreTransaction;
use seatkeeper_core::{Booking, BookingError, BookingId, EventId, RequesterId, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Orchestrates lock, ledger and booking record for each request.
#[derive(Clone)]
pub struct BookingCoordinator {
    env: BookingEnvironment,
    ledger: CapacityLedger,
    dispatcher: NotificationDispatcher,
    settings: BookingSettings,
}

impl BookingCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(env: BookingEnvironment, settings: BookingSettings) -> Self {
        let ledger = CapacityLedger::new(env.store.clone());
        let dispatcher = NotificationDispatcher::new(env.notifier.clone());
        Self {
            env,
            ledger,
            dispatcher,
            settings,
        }
    }

    /// Replace the notification dispatcher (e.g. to shorten retry delays).
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// The ledger this coordinator books against.
    #[must_use]
    pub const fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    pub(crate) const fn env(&self) -> &BookingEnvironment {
        &self.env
    }

    pub(crate) const fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub(crate) const fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    /// Book `quantity` units of `event_id` for `requester_id`.
    ///
    /// On `InsufficientCapacity` nothing is written; whether to offer the
    /// waitlist is the caller's decision.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity` if `quantity` is 0 or above the configured maximum
    /// - `NotFound` if the event was never provisioned
    /// - `InsufficientCapacity` if the event cannot fit `quantity`
    /// - `LockTimeout` for a duplicate in-flight submission or a transaction
    ///   that exceeded its timeout (retryable)
    /// - `StoreUnavailable` if the store failed (retryable)
    #[tracing::instrument(
        skip_all,
        fields(event_id = %event_id, requester_id = %requester_id, quantity = quantity)
    )]
    pub async fn create(
        &self,
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
    ) -> Result<Booking> {
        let started = Instant::now();
        let result = self.create_locked(event_id, requester_id, quantity).await;
        metrics::record_booking(&result, started.elapsed());

        match &result {
            Ok(booking) => {
                tracing::info!(booking_id = %booking.id, "Booking confirmed");
                self.dispatcher.dispatch(Notification::BookingConfirmed {
                    booking: booking.clone(),
                });
            }
            Err(e) if e.is_insufficient_capacity() => {
                tracing::info!(error = %e, "Booking rejected");
            }
            Err(e) => {
                metrics::observe_error("create", e);
                tracing::warn!(error = %e, "Booking failed");
            }
        }
        result
    }

    async fn create_locked(
        &self,
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
    ) -> Result<Booking> {
        validate_quantity(quantity, self.settings.max_quantity)?;

        let key = LockKey::new(event_id, requester_id);
        let token = self.acquire_lock(&key).await?;

        let result: Result<_> = async {
            let (tx, outcome) = bounded(self.settings.transaction_timeout, async {
                let mut tx = self.env.store.begin().await?;
                let outcome = self
                    .book_in_tx(tx.as_mut(), event_id, requester_id, quantity)
                    .await;
                Ok((tx, outcome))
            })
            .await?;
            finish(tx, outcome).await
        }
        .await;

        if let Some(token) = token {
            self.release_lock(&key, &token).await;
        }
        result
    }

    /// Reserve capacity and insert a CONFIRMED booking inside `tx`.
    ///
    /// Shared with promotion, which books inside a transaction that already
    /// holds the inventory and waitlist entry locks.
    pub(crate) async fn book_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
    ) -> Result<Booking> {
        self.ledger.reserve(tx, event_id, quantity).await?;
        let booking = Booking::confirmed(event_id, requester_id, quantity, self.env.clock.now());
        tx.insert_booking(&booking).await?;
        Ok(booking)
    }

    /// Cancel a CONFIRMED booking and return its capacity.
    ///
    /// After commit a promotion check is enqueued for the event; a failure to
    /// enqueue is logged and left to the periodic sweep.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the booking does not exist
    /// - `InvalidState` if it is already cancelled
    /// - `LockTimeout` / `StoreUnavailable` on transient failure (retryable)
    /// - `InvariantViolation` if the release would make `reserved` negative
    #[tracing::instrument(skip_all, fields(booking_id = %booking_id))]
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking> {
        let result: Result<_> = async {
            let (tx, outcome) = bounded(self.settings.transaction_timeout, async {
                let mut tx = self.env.store.begin().await?;
                let outcome = self.cancel_in_tx(tx.as_mut(), booking_id).await;
                Ok((tx, outcome))
            })
            .await?;
            finish(tx, outcome).await
        }
        .await;

        let booking = match result {
            Ok(booking) => booking,
            Err(e) => {
                metrics::observe_error("cancel", &e);
                tracing::warn!(error = %e, "Cancellation failed");
                return Err(e);
            }
        };

        metrics::record_cancellation();
        tracing::info!(
            event_id = %booking.event_id,
            quantity = booking.quantity,
            "Booking cancelled"
        );

        let check = PromotionCheck::new(
            booking.event_id,
            PromotionReason::Cancellation,
            self.env.clock.now(),
        );
        if let Err(e) = self.env.promotions.enqueue(check).await {
            tracing::warn!(
                event_id = %booking.event_id,
                error = %e,
                "Failed to enqueue promotion check; sweep will retry"
            );
        }

        self.dispatcher.dispatch(Notification::BookingCancelled {
            booking: booking.clone(),
        });
        Ok(booking)
    }

    async fn cancel_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        booking_id: BookingId,
    ) -> Result<Booking> {
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

        booking.cancel(self.env.clock.now())?;
        tx.update_booking(&booking).await?;
        self.ledger
            .release(tx, booking.event_id, booking.quantity)
            .await?;
        Ok(booking)
    }

    /// Look up a booking.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.env
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
    }

    /// All bookings made by a requester, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn bookings_for_requester(&self, requester_id: RequesterId) -> Result<Vec<Booking>> {
        self.env.store.bookings_for_requester(requester_id).await
    }

    /// All bookings for an event, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn bookings_for_event(&self, event_id: EventId) -> Result<Vec<Booking>> {
        self.env.store.bookings_for_event(event_id).await
    }

    async fn acquire_lock(&self, key: &LockKey) -> Result<Option<LockToken>> {
        let Some(locks) = self.env.locks.as_ref().filter(|_| self.settings.lock_enabled) else {
            return Ok(None);
        };

        match locks.acquire(key, self.settings.lock_ttl).await {
            Ok(token) => Ok(Some(token)),
            Err(LockError::AlreadyLocked(name)) => Err(BookingError::LockTimeout(format!(
                "submission already in flight for {name}"
            ))),
            Err(e) => {
                tracing::warn!(lock = %key, error = %e, "Lock coordinator degraded, proceeding without lock");
                Ok(None)
            }
        }
    }

    async fn release_lock(&self, key: &LockKey, token: &LockToken) {
        let Some(locks) = self.env.locks.as_ref() else {
            return;
        };
        if let Err(e) = locks.release(key, token).await {
            tracing::warn!(lock = %key, error = %e, "Lock release failed");
        }
    }
}

/// Reject quantities outside `1..=max`.
pub(crate) const fn validate_quantity(quantity: u32, max: u32) -> Result<()> {
    if quantity == 0 || quantity > max {
        return Err(BookingError::InvalidQuantity { quantity, max });
    }
    Ok(())
}

/// Run the lock-and-write phase of a transaction under `limit`.
///
/// `work` owns the transaction until it returns it for [`finish`]; an elapsed
/// timeout drops both, which rolls the transaction back. Never pass a commit
/// in here: a commit that lands after the deadline would be reported as a
/// retryable failure.
pub(crate) async fn bounded<T>(limit: Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
        Err(BookingError::LockTimeout(format!(
            "transaction exceeded {}ms",
            limit.as_millis()
        )))
    })
}

/// Roll back, logging a failure to do so.
pub(crate) async fn abandon(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

/// Commit on success, roll back on failure.
pub(crate) async fn finish<T>(tx: Box<dyn StoreTransaction>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            abandon(tx).await;
            Err(e)
        }
    }
}
