//! Row decoding and error mapping.

use seatkeeper_core::{
    Booking, BookingError, BookingId, BookingStatus, EventId, EventInventory, RequesterId, Result,
    WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const INVENTORY_COLUMNS: &str = "event_id, capacity, reserved, version";

pub(crate) const BOOKING_COLUMNS: &str =
    "id, event_id, requester_id, quantity, status, created_at, cancelled_at";

pub(crate) const ENTRY_COLUMNS: &str = "id, event_id, requester_id, quantity, status, position, \
     joined_at, promoted_at, promoted_booking_id";

/// SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for check constraint violations.
const CHECK_VIOLATION: &str = "23514";

/// Map a sqlx error onto the booking taxonomy.
///
/// Constraint violations mean the store caught a state the model forbids;
/// everything else is treated as the store being unreachable or overloaded.
pub(crate) fn map_err(context: &str, err: sqlx::Error) -> BookingError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(db.code().as_deref(), Some(UNIQUE_VIOLATION | CHECK_VIOLATION)) {
            metrics::counter!("seatkeeper_store_constraint_violations_total").increment(1);
            return BookingError::InvariantViolation(format!(
                "{context}: {} ({})",
                db.message(),
                db.constraint().unwrap_or("unnamed constraint")
            ));
        }
    }
    BookingError::StoreUnavailable(format!("{context}: {err}"))
}

pub(crate) fn to_db_units(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| BookingError::InvariantViolation(format!("{what} {value} exceeds i32::MAX")))
}

fn from_db_units(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| BookingError::InvariantViolation(format!("stored {what} {value} is negative")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| BookingError::StoreUnavailable(format!("decode {column}: {e}")))
}

pub(crate) fn inventory_from_row(row: &PgRow) -> Result<EventInventory> {
    Ok(EventInventory {
        event_id: EventId::from_uuid(get(row, "event_id")?),
        capacity: from_db_units(get(row, "capacity")?, "capacity")?,
        reserved: from_db_units(get(row, "reserved")?, "reserved")?,
        version: get(row, "version")?,
    })
}

pub(crate) fn booking_from_row(row: &PgRow) -> Result<Booking> {
    let status: String = get(row, "status")?;
    Ok(Booking {
        id: BookingId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        requester_id: RequesterId::from_uuid(get(row, "requester_id")?),
        quantity: from_db_units(get(row, "quantity")?, "quantity")?,
        status: BookingStatus::parse(&status)?,
        created_at: get(row, "created_at")?,
        cancelled_at: get(row, "cancelled_at")?,
    })
}

pub(crate) fn entry_from_row(row: &PgRow) -> Result<WaitlistEntry> {
    let status: String = get(row, "status")?;
    let promoted_booking_id: Option<uuid::Uuid> = get(row, "promoted_booking_id")?;
    Ok(WaitlistEntry {
        id: WaitlistEntryId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        requester_id: RequesterId::from_uuid(get(row, "requester_id")?),
        quantity: from_db_units(get(row, "quantity")?, "quantity")?,
        status: WaitlistStatus::parse(&status)?,
        position: get(row, "position")?,
        joined_at: get(row, "joined_at")?,
        promoted_at: get(row, "promoted_at")?,
        promoted_booking_id: promoted_booking_id.map(BookingId::from_uuid),
    })
}
