//! In-memory [`BookingStore`] with real row-lock semantics.
//!
//! Each row (inventory, booking, waitlist entry) has its own async mutex. A
//! transaction takes row mutexes as it locks rows and holds the owned guards
//! until it ends, so concurrent transactions on the same event serialize the
//! same way they would under `SELECT … FOR UPDATE`. Writes are staged in the
//! transaction and applied to the shared tables in one step on commit;
//! dropping the transaction discards them. A savepoint is a snapshot of the
//! staged writes and of which rows were locked at the time.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use seatkeeper_core::store::{BookingStore, StoreTransaction};
use seatkeeper_core::{
    Booking, BookingError, BookingId, EventId, EventInventory, RequesterId, Result, WaitlistEntry,
    WaitlistEntryId, WaitlistStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Inventory(EventId),
    Booking(BookingId),
    Entry(WaitlistEntryId),
}

#[derive(Default)]
struct Tables {
    inventories: HashMap<EventId, EventInventory>,
    bookings: HashMap<BookingId, Booking>,
    entries: HashMap<WaitlistEntryId, WaitlistEntry>,
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
    fail_next_booking_insert: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
    scan_delay: Mutex<Option<Duration>>,
}

/// In-memory store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use seatkeeper_testing::InMemoryStore;
/// use seatkeeper_core::store::BookingStore;
/// use seatkeeper_core::{EventId, EventInventory};
///
/// # async fn example() -> seatkeeper_core::Result<()> {
/// let store = InMemoryStore::new();
/// let event_id = EventId::new();
/// store.insert_inventory(&EventInventory::new(event_id, 100)).await?;
///
/// let mut tx = store.begin().await?;
/// let inventory = tx.lock_inventory(event_id).await?;
/// assert_eq!(inventory.map(|i| i.available()), Some(100));
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `begin` fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next commit fail with `StoreUnavailable`; nothing is applied.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next `insert_booking` fail with `StoreUnavailable`.
    pub fn fail_next_booking_insert(&self) {
        self.faults.fail_next_booking_insert.store(true, Ordering::SeqCst);
    }

    /// Sleep this long inside every commit after the writes are applied,
    /// like a database whose acknowledgement is slow to arrive.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *self.faults.commit_delay.lock().unwrap() = delay;
    }

    /// Sleep this long at the start of every waitlist scan, holding whatever
    /// row locks the transaction already has.
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        *self.faults.scan_delay.lock().unwrap() = delay;
    }

    /// Every booking in the store, any status.
    #[must_use]
    pub fn all_bookings(&self) -> Vec<Booking> {
        self.tables.read().unwrap().bookings.values().cloned().collect()
    }

    /// Every waitlist entry in the store, any status.
    #[must_use]
    pub fn all_entries(&self) -> Vec<WaitlistEntry> {
        self.tables.read().unwrap().entries.values().cloned().collect()
    }

    /// Overwrite an inventory row directly, bypassing transactions.
    ///
    /// For seeding corrupt states in invariant tests.
    pub fn force_inventory(&self, inventory: EventInventory) {
        self.tables
            .write()
            .unwrap()
            .inventories
            .insert(inventory.event_id, inventory);
    }

    fn row_lock(&self, key: RowKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.row_locks.lock().unwrap().entry(key).or_default())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(BookingError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            guards: HashMap::new(),
            inventories: HashMap::new(),
            bookings: HashMap::new(),
            entries: HashMap::new(),
            savepoint: None,
        }))
    }

    async fn insert_inventory(&self, inventory: &EventInventory) -> Result<EventInventory> {
        let mut tables = self.tables.write().unwrap();
        Ok(tables
            .inventories
            .entry(inventory.event_id)
            .or_insert_with(|| inventory.clone())
            .clone())
    }

    async fn inventory(&self, event_id: EventId) -> Result<Option<EventInventory>> {
        Ok(self.tables.read().unwrap().inventories.get(&event_id).cloned())
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        Ok(self.tables.read().unwrap().bookings.get(&booking_id).cloned())
    }

    async fn bookings_for_event(&self, event_id: EventId) -> Result<Vec<Booking>> {
        let tables = self.tables.read().unwrap();
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn bookings_for_requester(&self, requester_id: RequesterId) -> Result<Vec<Booking>> {
        let tables = self.tables.read().unwrap();
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.requester_id == requester_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn waitlist_entry(&self, entry_id: WaitlistEntryId) -> Result<Option<WaitlistEntry>> {
        Ok(self.tables.read().unwrap().entries.get(&entry_id).cloned())
    }

    async fn waiting_entries(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let tables = self.tables.read().unwrap();
        let mut entries: Vec<WaitlistEntry> = tables
            .entries
            .values()
            .filter(|e| e.event_id == event_id && e.is_waiting())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn waitlist_entries_for_requester(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<WaitlistEntry>> {
        let tables = self.tables.read().unwrap();
        let mut entries: Vec<WaitlistEntry> = tables
            .entries
            .values()
            .filter(|e| e.requester_id == requester_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(entries)
    }

    async fn events_with_waiting_entries(&self) -> Result<Vec<EventId>> {
        let tables = self.tables.read().unwrap();
        let mut events: Vec<EventId> = tables
            .entries
            .values()
            .filter(|e| e.is_waiting())
            .map(|e| e.event_id)
            .collect();
        events.sort();
        events.dedup();
        Ok(events)
    }
}

/// Staged writes and held row locks at the time of a savepoint.
struct Savepoint {
    locked: HashSet<RowKey>,
    inventories: HashMap<EventId, EventInventory>,
    bookings: HashMap<BookingId, Booking>,
    entries: HashMap<WaitlistEntryId, WaitlistEntry>,
}

/// Open transaction over an [`InMemoryStore`].
struct InMemoryTransaction {
    store: InMemoryStore,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    inventories: HashMap<EventId, EventInventory>,
    bookings: HashMap<BookingId, Booking>,
    entries: HashMap<WaitlistEntryId, WaitlistEntry>,
    savepoint: Option<Savepoint>,
}

impl InMemoryTransaction {
    async fn lock_row(&mut self, key: RowKey) {
        if self.guards.contains_key(&key) {
            return;
        }
        let guard = self.store.row_lock(key).lock_owned().await;
        self.guards.insert(key, guard);
    }

    fn require_lock(&self, key: RowKey) -> Result<()> {
        if self.guards.contains_key(&key) {
            Ok(())
        } else {
            Err(BookingError::InvariantViolation(format!(
                "write to {key:?} without holding its row lock"
            )))
        }
    }

    fn take_savepoint(&mut self) -> Result<Savepoint> {
        self.savepoint.take().ok_or_else(|| {
            BookingError::InvariantViolation("no savepoint set in this transaction".to_string())
        })
    }

    fn read_inventory(&self, event_id: EventId) -> Option<EventInventory> {
        self.inventories.get(&event_id).cloned().or_else(|| {
            self.store.tables.read().unwrap().inventories.get(&event_id).cloned()
        })
    }

    fn read_booking(&self, booking_id: BookingId) -> Option<Booking> {
        self.bookings.get(&booking_id).cloned().or_else(|| {
            self.store.tables.read().unwrap().bookings.get(&booking_id).cloned()
        })
    }

    fn read_entry(&self, entry_id: WaitlistEntryId) -> Option<WaitlistEntry> {
        self.entries.get(&entry_id).cloned().or_else(|| {
            self.store.tables.read().unwrap().entries.get(&entry_id).cloned()
        })
    }

    /// Committed entries for an event overlaid with this transaction's writes.
    fn event_entries(&self, event_id: EventId) -> Vec<WaitlistEntry> {
        let tables = self.store.tables.read().unwrap();
        let mut merged: HashMap<WaitlistEntryId, WaitlistEntry> = tables
            .entries
            .values()
            .filter(|e| e.event_id == event_id)
            .map(|e| (e.id, e.clone()))
            .collect();
        for entry in self.entries.values().filter(|e| e.event_id == event_id) {
            merged.insert(entry.id, entry.clone());
        }
        merged.into_values().collect()
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_inventory(&mut self, event_id: EventId) -> Result<Option<EventInventory>> {
        self.lock_row(RowKey::Inventory(event_id)).await;
        Ok(self.read_inventory(event_id))
    }

    async fn update_inventory(&mut self, inventory: &EventInventory) -> Result<()> {
        self.require_lock(RowKey::Inventory(inventory.event_id))?;
        self.inventories.insert(inventory.event_id, inventory.clone());
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        if self.store.faults.fail_next_booking_insert.swap(false, Ordering::SeqCst) {
            return Err(BookingError::StoreUnavailable(
                "injected booking insert failure".to_string(),
            ));
        }
        if self.read_booking(booking.id).is_some() {
            return Err(BookingError::InvariantViolation(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        self.lock_row(RowKey::Booking(booking.id)).await;
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>> {
        self.lock_row(RowKey::Booking(booking_id)).await;
        Ok(self.read_booking(booking_id))
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        self.require_lock(RowKey::Booking(booking.id))?;
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn next_waitlist_position(&mut self, event_id: EventId) -> Result<i64> {
        Ok(self
            .event_entries(event_id)
            .iter()
            .map(|e| e.position)
            .max()
            .map_or(1, |max| max + 1))
    }

    async fn waiting_entry_for(
        &mut self,
        event_id: EventId,
        requester_id: RequesterId,
    ) -> Result<Option<WaitlistEntry>> {
        Ok(self
            .event_entries(event_id)
            .into_iter()
            .find(|e| e.requester_id == requester_id && e.status == WaitlistStatus::Waiting))
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()> {
        if self
            .event_entries(entry.event_id)
            .iter()
            .any(|e| e.position == entry.position)
        {
            return Err(BookingError::InvariantViolation(format!(
                "waitlist position {} already taken for event {}",
                entry.position, entry.event_id
            )));
        }
        self.lock_row(RowKey::Entry(entry.id)).await;
        self.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn next_waiting_entry(
        &mut self,
        event_id: EventId,
        after_position: Option<i64>,
    ) -> Result<Option<WaitlistEntry>> {
        let delay = *self.store.faults.scan_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut candidates: Vec<WaitlistEntry> = self
            .event_entries(event_id)
            .into_iter()
            .filter(|e| e.is_waiting() && after_position.is_none_or(|after| e.position > after))
            .collect();
        candidates.sort_by_key(|e| e.position);

        for candidate in candidates {
            self.lock_row(RowKey::Entry(candidate.id)).await;
            // Re-read under the lock; a concurrent withdrawal may have won
            if let Some(entry) = self.read_entry(candidate.id).filter(WaitlistEntry::is_waiting) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn lock_waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<WaitlistEntry>> {
        self.lock_row(RowKey::Entry(entry_id)).await;
        Ok(self.read_entry(entry_id))
    }

    async fn update_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()> {
        self.require_lock(RowKey::Entry(entry.id))?;
        self.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<()> {
        self.savepoint = Some(Savepoint {
            locked: self.guards.keys().copied().collect(),
            inventories: self.inventories.clone(),
            bookings: self.bookings.clone(),
            entries: self.entries.clone(),
        });
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<()> {
        let savepoint = self.take_savepoint()?;
        self.guards.retain(|key, _| savepoint.locked.contains(key));
        self.inventories = savepoint.inventories;
        self.bookings = savepoint.bookings;
        self.entries = savepoint.entries;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<()> {
        self.take_savepoint().map(drop)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(BookingError::StoreUnavailable(
                "injected commit failure".to_string(),
            ));
        }

        let this = *self;
        {
            let mut tables = this.store.tables.write().unwrap();
            tables.inventories.extend(this.inventories);
            tables.bookings.extend(this.bookings);
            tables.entries.extend(this.entries);
        }
        drop(this.guards);

        let delay = *this.store.faults.commit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_discarded_on_drop() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 10)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut inventory = tx.lock_inventory(event_id).await.unwrap().unwrap();
        inventory.reserved = 4;
        tx.update_inventory(&inventory).await.unwrap();
        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 0);
        drop(tx);

        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 0);
        // Lock was released with the dropped transaction
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_inventory(event_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_locker_waits_for_commit() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 10)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut inventory = first.lock_inventory(event_id).await.unwrap().unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.lock_inventory(event_id).await.unwrap().unwrap().reserved
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        inventory.reserved = 3;
        first.update_inventory(&inventory).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(contender.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn update_without_lock_is_rejected() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update_inventory(&EventInventory::new(EventId::new(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn duplicate_waitlist_position_is_an_invariant_violation() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        let mut tx = store.begin().await.unwrap();
        let first = WaitlistEntry::waiting(event_id, RequesterId::new(), 1, 1, Utc::now());
        let clash = WaitlistEntry::waiting(event_id, RequesterId::new(), 1, 1, Utc::now());
        tx.insert_waitlist_entry(&first).await.unwrap();

        let err = tx.insert_waitlist_entry(&clash).await.unwrap_err();
        assert!(matches!(err, BookingError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn rollback_to_savepoint_discards_later_writes_only() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 5)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut inventory = tx.lock_inventory(event_id).await.unwrap().unwrap();
        inventory.reserved = 1;
        tx.update_inventory(&inventory).await.unwrap();

        tx.savepoint().await.unwrap();
        inventory.reserved = 3;
        tx.update_inventory(&inventory).await.unwrap();
        let booking = Booking::confirmed(event_id, RequesterId::new(), 2, Utc::now());
        tx.insert_booking(&booking).await.unwrap();
        tx.rollback_to_savepoint().await.unwrap();

        // Inventory lock predates the savepoint and is still held
        assert_eq!(tx.lock_inventory(event_id).await.unwrap().unwrap().reserved, 1);
        assert!(tx.lock_booking(booking.id).await.unwrap().is_none());
        assert!(matches!(
            tx.release_savepoint().await,
            Err(BookingError::InvariantViolation(_))
        ));
        tx.commit().await.unwrap();

        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 1);
        assert!(store.all_bookings().is_empty());
    }

    #[tokio::test]
    async fn released_savepoint_keeps_writes() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 5)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut inventory = tx.lock_inventory(event_id).await.unwrap().unwrap();
        tx.savepoint().await.unwrap();
        inventory.reserved = 2;
        tx.update_inventory(&inventory).await.unwrap();
        tx.release_savepoint().await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 2);
    }

    #[tokio::test]
    async fn slow_commit_acknowledgement_applies_writes_first() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 5)).await.unwrap();
        store.set_commit_delay(Some(Duration::from_secs(5)));

        let mut tx = store.begin().await.unwrap();
        let mut inventory = tx.lock_inventory(event_id).await.unwrap().unwrap();
        inventory.reserved = 4;
        tx.update_inventory(&inventory).await.unwrap();
        let commit = tokio::spawn(tx.commit());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!commit.is_finished());
        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 4);
        commit.abort();
    }

    #[tokio::test]
    async fn injected_commit_failure_applies_nothing() {
        let store = InMemoryStore::new();
        let event_id = EventId::new();
        store.insert_inventory(&EventInventory::new(event_id, 5)).await.unwrap();
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        let mut inventory = tx.lock_inventory(event_id).await.unwrap().unwrap();
        inventory.reserved = 5;
        tx.update_inventory(&inventory).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert_eq!(store.inventory(event_id).await.unwrap().unwrap().reserved, 0);
    }
}
