//! [`StoreTransaction`] over a pooled Postgres transaction.
//!
//! Every `lock_*` method is a `SELECT … FOR UPDATE`. Under read-committed
//! isolation the second locker blocks until the first commits, then reads the
//! committed row.

use crate::rows::{
    BOOKING_COLUMNS, ENTRY_COLUMNS, INVENTORY_COLUMNS, booking_from_row, entry_from_row,
    inventory_from_row, map_err, to_db_units,
};
use async_trait::async_trait;
use seatkeeper_core::store::StoreTransaction;
use seatkeeper_core::{
    Booking, BookingError, BookingId, EventId, EventInventory, RequesterId, Result, WaitlistEntry,
    WaitlistEntryId, WaitlistStatus,
};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

const SAVEPOINT: &str = "seatkeeper_step";

pub(crate) struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    savepoint_set: bool,
}

impl PgStoreTransaction {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx,
            savepoint_set: false,
        }
    }

    async fn execute(&mut self, sql: &str, operation: &'static str) -> Result<()> {
        sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_err(operation, e))?;
        Ok(())
    }

    fn require_savepoint(&self) -> Result<()> {
        if self.savepoint_set {
            Ok(())
        } else {
            Err(BookingError::InvariantViolation(
                "no savepoint set in this transaction".to_string(),
            ))
        }
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_inventory(&mut self, event_id: EventId) -> Result<Option<EventInventory>> {
        let sql = format!("SELECT {INVENTORY_COLUMNS} FROM event_inventory WHERE event_id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_err("lock inventory", e))?
            .as_ref()
            .map(inventory_from_row)
            .transpose()
    }

    async fn update_inventory(&mut self, inventory: &EventInventory) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE event_inventory
            SET capacity = $2, reserved = $3, version = $4, updated_at = now()
            WHERE event_id = $1
            ",
        )
        .bind(inventory.event_id.as_uuid())
        .bind(to_db_units(inventory.capacity, "capacity")?)
        .bind(to_db_units(inventory.reserved, "reserved")?)
        .bind(inventory.version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_err("update inventory", e))?;

        if result.rows_affected() == 0 {
            return Err(BookingError::not_found("event inventory", inventory.event_id));
        }
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO bookings (id, event_id, requester_id, quantity, status, created_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.event_id.as_uuid())
        .bind(booking.requester_id.as_uuid())
        .bind(to_db_units(booking.quantity, "quantity")?)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_err("insert booking", e))?;
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: BookingId) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_err("lock booking", e))?
            .as_ref()
            .map(booking_from_row)
            .transpose()
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        sqlx::query("UPDATE bookings SET status = $2, cancelled_at = $3 WHERE id = $1")
            .bind(booking.id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.cancelled_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_err("update booking", e))?;
        Ok(())
    }

    async fn next_waitlist_position(&mut self, event_id: EventId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(position), 0) + 1 AS next FROM waitlist_entries WHERE event_id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_err("next waitlist position", e))?;

        row.try_get("next")
            .map_err(|e| BookingError::StoreUnavailable(format!("decode next: {e}")))
    }

    async fn waiting_entry_for(
        &mut self,
        event_id: EventId,
        requester_id: RequesterId,
    ) -> Result<Option<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries \
             WHERE event_id = $1 AND requester_id = $2 AND status = $3 LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(requester_id.as_uuid())
            .bind(WaitlistStatus::Waiting.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_err("find waiting entry", e))?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO waitlist_entries (
                id, event_id, requester_id, quantity, status, position,
                joined_at, promoted_at, promoted_booking_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_id.as_uuid())
        .bind(entry.requester_id.as_uuid())
        .bind(to_db_units(entry.quantity, "quantity")?)
        .bind(entry.status.as_str())
        .bind(entry.position)
        .bind(entry.joined_at)
        .bind(entry.promoted_at)
        .bind(entry.promoted_booking_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_err("insert waitlist entry", e))?;
        Ok(())
    }

    async fn next_waiting_entry(
        &mut self,
        event_id: EventId,
        after_position: Option<i64>,
    ) -> Result<Option<WaitlistEntry>> {
        // Candidates are read unlocked, then locked one by one and re-checked,
        // since a concurrent withdrawal can change status while we wait.
        let candidates: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT id FROM waitlist_entries
            WHERE event_id = $1 AND status = $2 AND position > $3
            ORDER BY position ASC
            ",
        )
        .bind(event_id.as_uuid())
        .bind(WaitlistStatus::Waiting.as_str())
        .bind(after_position.unwrap_or(i64::MIN))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_err("scan waitlist", e))?;

        for id in candidates {
            let locked = self.lock_waitlist_entry(WaitlistEntryId::from_uuid(id)).await?;
            if let Some(entry) = locked.filter(WaitlistEntry::is_waiting) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn lock_waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<WaitlistEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM waitlist_entries WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(entry_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_err("lock waitlist entry", e))?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn update_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<()> {
        sqlx::query(
            r"
            UPDATE waitlist_entries
            SET status = $2, promoted_at = $3, promoted_booking_id = $4
            WHERE id = $1
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.status.as_str())
        .bind(entry.promoted_at)
        .bind(entry.promoted_booking_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_err("update waitlist entry", e))?;
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<()> {
        if self.savepoint_set {
            self.release_savepoint().await?;
        }
        self.execute(&format!("SAVEPOINT {SAVEPOINT}"), "savepoint").await?;
        self.savepoint_set = true;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<()> {
        self.require_savepoint()?;
        // ROLLBACK TO keeps the savepoint alive; release it so the next one
        // does not stack on top
        self.execute(&format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}"), "rollback to savepoint")
            .await?;
        self.release_savepoint().await
    }

    async fn release_savepoint(&mut self) -> Result<()> {
        self.require_savepoint()?;
        self.execute(&format!("RELEASE SAVEPOINT {SAVEPOINT}"), "release savepoint")
            .await?;
        self.savepoint_set = false;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await.map_err(|e| map_err("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await.map_err(|e| map_err("rollback", e))
    }
}
