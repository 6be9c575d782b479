//! `PostgreSQL` booking store for Seatkeeper.
//!
//! Implements [`BookingStore`] on a `sqlx` connection pool. The per-event
//! exclusive lock is a `SELECT … FOR UPDATE` on the event's
//! `event_inventory` row, so bookings for different events never contend.
//!
//! The schema also enforces the model on its own: `reserved <= capacity` is a
//! check constraint and `(event_id, position)` is unique on the waitlist.
//! Violations surface as [`BookingError::InvariantViolation`].
//!
//! # Example
//!
//! ```ignore
//! use seatkeeper_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/seatkeeper", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod transaction;

use async_trait::async_trait;
use rows::{
    BOOKING_COLUMNS, ENTRY_COLUMNS, INVENTORY_COLUMNS, booking_from_row, entry_from_row,
    inventory_from_row, map_err, to_db_units,
};
use seatkeeper_core::store::{BookingStore, StoreTransaction};
use seatkeeper_core::{
    Booking, BookingError, BookingId, EventId, EventInventory, RequesterId, Result, WaitlistEntry,
    WaitlistEntryId, WaitlistStatus,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use transaction::PgStoreTransaction;
use uuid::Uuid;

/// Booking store backed by `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StoreUnavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        Self::connect_with_timeout(database_url, max_connections, Duration::from_secs(30)).await
    }

    /// Connect a new pool, waiting at most `acquire_timeout` for a connection.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StoreUnavailable`] if the database cannot be reached.
    pub async fn connect_with_timeout(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| BookingError::StoreUnavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Run the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StoreUnavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BookingError::StoreUnavailable(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookingStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| map_err("begin", e))?;
        Ok(Box::new(PgStoreTransaction::new(tx)))
    }

    async fn insert_inventory(&self, inventory: &EventInventory) -> Result<EventInventory> {
        sqlx::query(
            r"
            INSERT INTO event_inventory (event_id, capacity, reserved, version)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(inventory.event_id.as_uuid())
        .bind(to_db_units(inventory.capacity, "capacity")?)
        .bind(to_db_units(inventory.reserved, "reserved")?)
        .bind(inventory.version)
        .execute(&self.pool)
        .await
        .map_err(|e| map_err("insert inventory", e))?;

        self.inventory(inventory.event_id)
            .await?
            .ok_or_else(|| BookingError::not_found("event inventory", inventory.event_id))
    }

    async fn inventory(&self, event_id: EventId) -> Result<Option<EventInventory>> {
        let sql = format!("SELECT {INVENTORY_COLUMNS} FROM event_inventory WHERE event_id = $1");
        sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_err("load inventory", e))?
            .as_ref()
            .map(inventory_from_row)
            .transpose()
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_err("load booking", e))?
            .as_ref()
            .map(booking_from_row)
            .transpose()
    }

    async fn bookings_for_event(&self, event_id: EventId) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE event_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_err("list bookings for event", e))?
            .iter()
            .map(booking_from_row)
            .collect()
    }

    async fn bookings_for_requester(&self, requester_id: RequesterId) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE requester_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query(&sql)
            .bind(requester_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_err("list bookings for requester", e))?
            .iter()
            .map(booking_from_row)
            .collect()
    }

    async fn waitlist_entry(&self, entry_id: WaitlistEntryId) -> Result<Option<WaitlistEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM waitlist_entries WHERE id = $1");
        sqlx::query(&sql)
            .bind(entry_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_err("load waitlist entry", e))?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn waiting_entries(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries \
             WHERE event_id = $1 AND status = $2 ORDER BY position ASC"
        );
        sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(WaitlistStatus::Waiting.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_err("list waiting entries", e))?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn waitlist_entries_for_requester(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries \
             WHERE requester_id = $1 ORDER BY joined_at DESC"
        );
        sqlx::query(&sql)
            .bind(requester_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_err("list waitlist entries for requester", e))?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn events_with_waiting_entries(&self) -> Result<Vec<EventId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT event_id FROM waitlist_entries WHERE status = $1",
        )
        .bind(WaitlistStatus::Waiting.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("list events with waiting entries", e))?;

        Ok(ids.into_iter().map(EventId::from_uuid).collect())
    }
}
