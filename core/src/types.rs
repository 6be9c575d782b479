//! Domain types for capacity allocation.
//!
//! Value objects and records shared by the ledger, the booking coordinator,
//! the waitlist and the promotion worker. State transitions that have rules
//! (cancel, promote, withdraw) live on the records themselves so every store
//! implementation enforces them identically.

use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event (the unit capacity is counted against)
    EventId
);
uuid_id!(
    /// Unique identifier for whoever submits a booking or joins a waitlist
    RequesterId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a waitlist entry
    WaitlistEntryId
);

// ============================================================================
// Inventory
// ============================================================================

/// Aggregate capacity counter for one event.
///
/// Invariant: `reserved <= capacity`. Only the Capacity Ledger mutates this
/// record, and only while holding the event's exclusive row lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInventory {
    /// Event this counter belongs to
    pub event_id: EventId,
    /// Total sellable units
    pub capacity: u32,
    /// Units committed to CONFIRMED bookings
    pub reserved: u32,
    /// Bumped by one on every mutation
    pub version: i64,
}

impl EventInventory {
    /// Fresh inventory with nothing reserved.
    #[must_use]
    pub const fn new(event_id: EventId, capacity: u32) -> Self {
        Self {
            event_id,
            capacity,
            reserved: 0,
            version: 0,
        }
    }

    /// Units still free to reserve.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved)
    }

    /// Whether `quantity` more units fit under capacity.
    #[must_use]
    pub const fn can_fit(&self, quantity: u32) -> bool {
        match self.reserved.checked_add(quantity) {
            Some(total) => total <= self.capacity,
            None => false,
        }
    }

    /// Checks `reserved <= capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvariantViolation`] if the row is over-reserved.
    pub fn check_invariant(&self) -> Result<()> {
        if self.reserved > self.capacity {
            return Err(BookingError::InvariantViolation(format!(
                "event {} has reserved {} above capacity {}",
                self.event_id, self.reserved, self.capacity
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// Booking lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Units are held against the event's capacity
    Confirmed,
    /// Units were returned to the pool
    Cancelled,
}

impl BookingStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(BookingError::InvariantViolation(format!(
                "Invalid booking status: {s}"
            ))),
        }
    }
}

/// A confirmed (or since cancelled) claim on an event's capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Event the units are held against
    pub event_id: EventId,
    /// Who holds the units
    pub requester_id: RequesterId,
    /// Number of units (> 0)
    pub quantity: u32,
    /// Current status
    pub status: BookingStatus,
    /// When the booking was confirmed
    pub created_at: DateTime<Utc>,
    /// When the booking was cancelled, if it was
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// New CONFIRMED booking.
    #[must_use]
    pub fn confirmed(
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BookingId::new(),
            event_id,
            requester_id,
            quantity,
            status: BookingStatus::Confirmed,
            created_at,
            cancelled_at: None,
        }
    }

    /// Whether the booking still holds capacity.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// CONFIRMED → CANCELLED.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the booking is not CONFIRMED.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.is_confirmed() {
            return Err(BookingError::InvalidState {
                resource: "booking",
                id: self.id.to_string(),
                reason: format!("cannot cancel a {} booking", self.status.as_str()),
            });
        }
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(at);
        Ok(())
    }
}

// ============================================================================
// Waitlist
// ============================================================================

/// Waitlist entry lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    /// Eligible for promotion
    Waiting,
    /// Converted into a booking (terminal)
    Promoted,
    /// Aged out without promotion (terminal)
    Expired,
    /// Left the queue voluntarily (terminal)
    Withdrawn,
}

impl WaitlistStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Promoted => "promoted",
            Self::Expired => "expired",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "promoted" => Ok(Self::Promoted),
            "expired" => Ok(Self::Expired),
            "withdrawn" => Ok(Self::Withdrawn),
            _ => Err(BookingError::InvariantViolation(format!(
                "Invalid waitlist status: {s}"
            ))),
        }
    }
}

/// A queued request for capacity that was unavailable at booking time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Entry ID
    pub id: WaitlistEntryId,
    /// Event being waited on
    pub event_id: EventId,
    /// Who is waiting
    pub requester_id: RequesterId,
    /// Units wanted
    pub quantity: u32,
    /// Current status
    pub status: WaitlistStatus,
    /// FIFO position, strictly increasing per event
    pub position: i64,
    /// When the entry joined the queue
    pub joined_at: DateTime<Utc>,
    /// When the entry was promoted
    pub promoted_at: Option<DateTime<Utc>>,
    /// Booking created by the promotion
    pub promoted_booking_id: Option<BookingId>,
}

impl WaitlistEntry {
    /// New WAITING entry at `position`.
    #[must_use]
    pub fn waiting(
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
        position: i64,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WaitlistEntryId::new(),
            event_id,
            requester_id,
            quantity,
            status: WaitlistStatus::Waiting,
            position,
            joined_at,
            promoted_at: None,
            promoted_booking_id: None,
        }
    }

    /// Whether the entry is still eligible for promotion.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.status == WaitlistStatus::Waiting
    }

    /// WAITING → PROMOTED, exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the entry is not WAITING.
    pub fn promote(&mut self, booking_id: BookingId, at: DateTime<Utc>) -> Result<()> {
        self.require_waiting("promote")?;
        self.status = WaitlistStatus::Promoted;
        self.promoted_at = Some(at);
        self.promoted_booking_id = Some(booking_id);
        Ok(())
    }

    /// WAITING → WITHDRAWN.
    ///
    /// Returns `false` when the entry was already withdrawn, so repeated
    /// calls are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the entry was promoted or expired.
    pub fn withdraw(&mut self) -> Result<bool> {
        if self.status == WaitlistStatus::Withdrawn {
            return Ok(false);
        }
        self.require_waiting("withdraw")?;
        self.status = WaitlistStatus::Withdrawn;
        Ok(true)
    }

    /// WAITING → EXPIRED.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the entry is not WAITING.
    pub fn expire(&mut self) -> Result<()> {
        self.require_waiting("expire")?;
        self.status = WaitlistStatus::Expired;
        Ok(())
    }

    fn require_waiting(&self, action: &str) -> Result<()> {
        if self.is_waiting() {
            Ok(())
        } else {
            Err(BookingError::InvalidState {
                resource: "waitlist entry",
                id: self.id.to_string(),
                reason: format!("cannot {action} a {} entry", self.status.as_str()),
            })
        }
    }
}

/// Aggregate view of an event's WAITING entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistStats {
    /// Number of WAITING entries
    pub total_waiting: u64,
    /// Sum of quantities across WAITING entries
    pub total_quantity_requested: u64,
}

impl WaitlistStats {
    /// Summarize a set of entries, counting only WAITING ones.
    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a WaitlistEntry>) -> Self {
        entries
            .into_iter()
            .filter(|entry| entry.is_waiting())
            .fold(Self::default(), |mut stats, entry| {
                stats.total_waiting += 1;
                stats.total_quantity_requested += u64::from(entry.quantity);
                stats
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn inventory_available_and_fit() {
        let mut inventory = EventInventory::new(EventId::new(), 3);
        assert_eq!(inventory.available(), 3);
        assert!(inventory.can_fit(3));
        assert!(!inventory.can_fit(4));

        inventory.reserved = 2;
        assert_eq!(inventory.available(), 1);
        assert!(inventory.can_fit(1));
        assert!(!inventory.can_fit(2));
        assert!(!inventory.can_fit(u32::MAX));
    }

    #[test]
    fn over_reserved_inventory_is_an_invariant_violation() {
        let mut inventory = EventInventory::new(EventId::new(), 1);
        inventory.reserved = 2;
        let err = inventory.check_invariant().unwrap_err();
        assert!(matches!(err, BookingError::InvariantViolation(_)));
    }

    #[test]
    fn booking_cancels_once() {
        let now = Utc::now();
        let mut booking = Booking::confirmed(EventId::new(), RequesterId::new(), 2, now);
        booking.cancel(now).unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.cancelled_at, Some(now));

        let err = booking.cancel(now).unwrap_err();
        assert!(matches!(err, BookingError::InvalidState { .. }));
    }

    #[test]
    fn waitlist_entry_promotes_exactly_once() {
        let now = Utc::now();
        let mut entry = WaitlistEntry::waiting(EventId::new(), RequesterId::new(), 1, 1, now);
        let booking_id = BookingId::new();

        entry.promote(booking_id, now).unwrap();
        assert_eq!(entry.status, WaitlistStatus::Promoted);
        assert_eq!(entry.promoted_booking_id, Some(booking_id));

        assert!(entry.promote(BookingId::new(), now).is_err());
        assert!(entry.withdraw().is_err());
    }

    #[test]
    fn withdraw_is_idempotent() {
        let mut entry =
            WaitlistEntry::waiting(EventId::new(), RequesterId::new(), 1, 1, Utc::now());
        assert!(entry.withdraw().unwrap());
        assert!(!entry.withdraw().unwrap());
        assert_eq!(entry.status, WaitlistStatus::Withdrawn);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(BookingStatus::parse(status.as_str()).unwrap(), status);
        }
        for status in [
            WaitlistStatus::Waiting,
            WaitlistStatus::Promoted,
            WaitlistStatus::Expired,
            WaitlistStatus::Withdrawn,
        ] {
            assert_eq!(WaitlistStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(WaitlistStatus::parse("notified").is_err());
    }

    #[test]
    fn stats_ignore_non_waiting_entries() {
        let event_id = EventId::new();
        let now = Utc::now();
        let waiting = WaitlistEntry::waiting(event_id, RequesterId::new(), 3, 1, now);
        let mut withdrawn = WaitlistEntry::waiting(event_id, RequesterId::new(), 5, 2, now);
        withdrawn.withdraw().unwrap();
        let other = WaitlistEntry::waiting(event_id, RequesterId::new(), 2, 3, now);

        let stats = WaitlistStats::from_entries([&waiting, &withdrawn, &other]);
        assert_eq!(stats.total_waiting, 2);
        assert_eq!(stats.total_quantity_requested, 5);
    }
}
