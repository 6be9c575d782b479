//! Durable store contract.
//!
//! The store is the correctness mechanism: every capacity change happens inside
//! a [`StoreTransaction`] that holds the event's exclusive row lock from
//! [`StoreTransaction::lock_inventory`] until commit or rollback. Operations on
//! different events never contend.
//!
//! # Lock ordering
//!
//! Implementations block on row locks, so callers acquire them in a fixed order:
//!
//! ```text
//! booking row  →  inventory row  →  waitlist entry row
//! ```
//!
//! Cancellation locks the booking then the inventory; promotion locks the
//! inventory then the entry; creation and waitlist joins lock only the
//! inventory; withdrawal locks only the entry.
//!
//! # Atomicity
//!
//! Writes made through a transaction become visible together on
//! [`StoreTransaction::commit`]. Dropping a transaction without committing
//! (including when the future driving it is cancelled by a timeout) discards
//! every write and releases every lock.
//!
//! # Savepoints
//!
//! A transaction carries at most one savepoint. Promotion sets it before each
//! entry and rolls back to it when that entry fails, so one bad entry never
//! costs the run its inventory lock or the entries already promoted. Row
//! locks taken before the savepoint survive a rollback to it; locks taken
//! after it may not, so callers re-lock rows they still need.
//!
//! # Implementations
//!
//! - `PostgresStore` (in `seatkeeper-postgres`): `SELECT … FOR UPDATE` under read-committed
//! - `InMemoryStore` (in `seatkeeper-testing`): per-row async mutexes and staged writes

use crate::error::Result;
use crate::types::{
    Booking, BookingId, EventId, EventInventory, RequesterId, WaitlistEntry, WaitlistEntryId,
};
use async_trait::async_trait;

/// Durable store for inventories, bookings and waitlist entries.
///
/// Reads on the store itself are read-committed snapshots and take no locks.
/// Anything that mutates goes through [`BookingStore::begin`].
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if no connection could be obtained.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Insert an inventory row unless one already exists for the event.
    ///
    /// Returns the row as stored: the new one, or the existing one untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn insert_inventory(&self, inventory: &EventInventory) -> Result<EventInventory>;

    /// Current inventory for an event.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn inventory(&self, event_id: EventId) -> Result<Option<EventInventory>>;

    /// Booking by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>>;

    /// All bookings for an event, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn bookings_for_event(&self, event_id: EventId) -> Result<Vec<Booking>>;

    /// All bookings held by a requester, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn bookings_for_requester(&self, requester_id: RequesterId) -> Result<Vec<Booking>>;

    /// Waitlist entry by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn waitlist_entry(&self, entry_id: WaitlistEntryId) -> Result<Option<WaitlistEntry>>;

    /// WAITING entries for an event in ascending position order.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn waiting_entries(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>>;

    /// Every entry a requester ever created, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn waitlist_entries_for_requester(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<WaitlistEntry>>;

    /// Events with at least one WAITING entry (input to the periodic sweep).
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn events_with_waiting_entries(&self) -> Result<Vec<EventId>>;
}

/// An open unit of work against the store.
///
/// All `lock_*` methods block until the row lock is granted and hold it until
/// the transaction ends.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Take the event's exclusive row lock and read the inventory.
    ///
    /// Blocks every other transaction that locks the same event until this one
    /// commits or rolls back.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn lock_inventory(&mut self, event_id: EventId) -> Result<Option<EventInventory>>;

    /// Write back an inventory row previously locked in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on failure, `InvariantViolation` if the row
    /// was not locked by this transaction.
    async fn update_inventory(&mut self, inventory: &EventInventory) -> Result<()>;

    /// Insert a new booking.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Lock and read a booking row.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>>;

    /// Write back a booking row previously locked in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn update_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Next free waitlist position for an event.
    ///
    /// Callers must hold the event's inventory lock so positions are handed out
    /// serially.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn next_waitlist_position(&mut self, event_id: EventId) -> Result<i64>;

    /// The requester's WAITING entry for an event, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn waiting_entry_for(
        &mut self,
        event_id: EventId,
        requester_id: RequesterId,
    ) -> Result<Option<WaitlistEntry>>;

    /// Insert a new waitlist entry.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the position is already taken for the
    /// event, `StoreUnavailable` on other failures.
    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()>;

    /// Lowest-position WAITING entry strictly after `after_position`, locked.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn next_waiting_entry(
        &mut self,
        event_id: EventId,
        after_position: Option<i64>,
    ) -> Result<Option<WaitlistEntry>>;

    /// Lock and read a waitlist entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn lock_waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<WaitlistEntry>>;

    /// Write back a waitlist entry previously locked in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn update_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()>;

    /// Set the savepoint, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on connection or query failure.
    async fn savepoint(&mut self) -> Result<()>;

    /// Discard every write made since [`StoreTransaction::savepoint`] and
    /// forget it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no savepoint is set, `StoreUnavailable`
    /// on connection or query failure.
    async fn rollback_to_savepoint(&mut self) -> Result<()>;

    /// Keep the writes made since [`StoreTransaction::savepoint`] and forget it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no savepoint is set, `StoreUnavailable`
    /// on connection or query failure.
    async fn release_savepoint(&mut self) -> Result<()>;

    /// Make every write visible and release every lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the commit failed; nothing was applied.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write and release every lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store could not be told; locks are
    /// still released when the connection drops.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
