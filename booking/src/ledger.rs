//! Capacity Ledger: the only writer of [`EventInventory`].
//!
//! Every mutation runs inside a caller-owned [`StoreTransaction`] after taking
//! the event's exclusive row lock, so reserve/release for one event observe a
//! total order equal to commit order while different events never contend.
//! The ledger never commits; the booking or entry record written alongside
//! the mutation must land in the same transaction.

use seatkeeper_core::store::{BookingStore, StoreTransaction};
use seatkeeper_core::{BookingError, EventId, EventInventory, Result};
use std::sync::Arc;

/// Per-event capacity counters.
#[derive(Clone)]
pub struct CapacityLedger {
    store: Arc<dyn BookingStore>,
}

impl CapacityLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Take the event's row lock and return its inventory.
    ///
    /// The lock is held until `tx` commits or rolls back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event was never provisioned, or
    /// `InvariantViolation` if the stored row is already over-reserved.
    pub async fn lock(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
    ) -> Result<EventInventory> {
        let inventory = tx
            .lock_inventory(event_id)
            .await?
            .ok_or_else(|| BookingError::not_found("event", event_id))?;
        inventory.check_invariant()?;
        Ok(inventory)
    }

    /// Reserve `quantity` units for `event_id` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientCapacity` if `reserved + quantity > capacity`;
    /// nothing is written in that case.
    pub async fn reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
        quantity: u32,
    ) -> Result<EventInventory> {
        let mut inventory = self.lock(tx, event_id).await?;

        if !inventory.can_fit(quantity) {
            return Err(BookingError::InsufficientCapacity {
                event_id,
                requested: quantity,
                available: inventory.available(),
            });
        }

        inventory.reserved += quantity;
        inventory.version += 1;
        tx.update_inventory(&inventory).await?;

        tracing::debug!(
            event_id = %event_id,
            quantity,
            reserved = inventory.reserved,
            capacity = inventory.capacity,
            "Capacity reserved"
        );
        Ok(inventory)
    }

    /// Return `quantity` units for `event_id` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the release would drive `reserved`
    /// below zero.
    pub async fn release(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
        quantity: u32,
    ) -> Result<EventInventory> {
        let mut inventory = self.lock(tx, event_id).await?;

        inventory.reserved = inventory.reserved.checked_sub(quantity).ok_or_else(|| {
            BookingError::InvariantViolation(format!(
                "release of {quantity} on event {event_id} would drive reserved {} below zero",
                inventory.reserved
            ))
        })?;
        inventory.version += 1;
        tx.update_inventory(&inventory).await?;

        tracing::debug!(
            event_id = %event_id,
            quantity,
            reserved = inventory.reserved,
            capacity = inventory.capacity,
            "Capacity released"
        );
        Ok(inventory)
    }

    /// Create the inventory row for a newly created event.
    ///
    /// Provisioning the same capacity twice is a no-op returning the stored row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the event already exists with a different
    /// capacity.
    #[tracing::instrument(skip_all, fields(event_id = %event_id, capacity = capacity))]
    pub async fn provision(&self, event_id: EventId, capacity: u32) -> Result<EventInventory> {
        let stored = self
            .store
            .insert_inventory(&EventInventory::new(event_id, capacity))
            .await?;

        if stored.capacity != capacity {
            return Err(BookingError::InvalidState {
                resource: "event",
                id: event_id.to_string(),
                reason: format!(
                    "already provisioned with capacity {}, not {capacity}",
                    stored.capacity
                ),
            });
        }

        tracing::info!("Event inventory provisioned");
        Ok(stored)
    }

    /// Current committed inventory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the event was never provisioned.
    pub async fn inventory(&self, event_id: EventId) -> Result<EventInventory> {
        self.store
            .inventory(event_id)
            .await?
            .ok_or_else(|| BookingError::not_found("event", event_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatkeeper_testing::InMemoryStore;

    async fn ledger_with_event(capacity: u32) -> (CapacityLedger, Arc<InMemoryStore>, EventId) {
        let store = Arc::new(InMemoryStore::new());
        let ledger = CapacityLedger::new(store.clone());
        let event_id = EventId::new();
        ledger.provision(event_id, capacity).await.unwrap();
        (ledger, store, event_id)
    }

    #[tokio::test]
    async fn reserve_increments_and_bumps_version() {
        let (ledger, store, event_id) = ledger_with_event(5).await;

        let mut tx = store.begin().await.unwrap();
        let inventory = ledger.reserve(tx.as_mut(), event_id, 3).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(inventory.reserved, 3);
        assert_eq!(inventory.version, 1);
        assert_eq!(ledger.inventory(event_id).await.unwrap().available(), 2);
    }

    #[tokio::test]
    async fn reserve_beyond_capacity_fails_without_writing() {
        let (ledger, store, event_id) = ledger_with_event(2).await;

        let mut tx = store.begin().await.unwrap();
        let err = ledger.reserve(tx.as_mut(), event_id, 3).await.unwrap_err();
        tx.rollback().await.unwrap();

        assert_eq!(
            err,
            BookingError::InsufficientCapacity {
                event_id,
                requested: 3,
                available: 2,
            }
        );
        let inventory = ledger.inventory(event_id).await.unwrap();
        assert_eq!((inventory.reserved, inventory.version), (0, 0));
    }

    #[tokio::test]
    async fn release_below_zero_is_invariant_violation() {
        let (ledger, store, event_id) = ledger_with_event(2).await;

        let mut tx = store.begin().await.unwrap();
        let err = ledger.release(tx.as_mut(), event_id, 1).await.unwrap_err();

        assert!(matches!(err, BookingError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let (ledger, store, event_id) = ledger_with_event(4).await;

        let mut tx = store.begin().await.unwrap();
        ledger.reserve(tx.as_mut(), event_id, 4).await.unwrap();
        let inventory = ledger.release(tx.as_mut(), event_id, 3).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(inventory.reserved, 1);
        assert_eq!(inventory.version, 2);
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let (ledger, store, _) = ledger_with_event(1).await;

        let mut tx = store.begin().await.unwrap();
        let err = ledger.reserve(tx.as_mut(), EventId::new(), 1).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound { resource: "event", .. }));

        assert!(ledger.inventory(EventId::new()).await.is_err());
    }

    #[tokio::test]
    async fn provision_is_idempotent_for_same_capacity() {
        let (ledger, _, event_id) = ledger_with_event(10).await;

        let again = ledger.provision(event_id, 10).await.unwrap();
        assert_eq!(again.capacity, 10);

        let err = ledger.provision(event_id, 12).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidState { resource: "event", .. }));
    }

    #[tokio::test]
    async fn over_reserved_row_is_reported() {
        let (ledger, store, event_id) = ledger_with_event(1).await;
        store.force_inventory(EventInventory {
            event_id,
            capacity: 1,
            reserved: 2,
            version: 7,
        });

        let mut tx = store.begin().await.unwrap();
        let err = ledger.lock(tx.as_mut(), event_id).await.unwrap_err();
        assert!(matches!(err, BookingError::InvariantViolation(_)));
    }
}
