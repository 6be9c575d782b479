//! Error taxonomy for capacity allocation.
//!
//! Every failure the core can return falls into one of three classes:
//!
//! - **User**: the request itself cannot be satisfied. Returned as-is, never retried.
//! - **Transient**: infrastructure hiccup. Nothing was written; the caller may retry
//!   with backoff (see `seatkeeper_runtime::retry`).
//! - **Invariant**: the stored state contradicts the model. Logged, counted and
//!   surfaced as a defect, never auto-corrected.

use crate::types::{EventId, RequesterId};
use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Broad classification of a [`BookingError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-facing rejection
    User,
    /// Safe to retry with backoff
    Transient,
    /// Defect; abort and investigate
    Invariant,
}

/// Errors returned by the ledger, coordinator, waitlist and stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    // ═══════════════════════════════════════════════════════════
    // User Errors
    // ═══════════════════════════════════════════════════════════

    /// Not enough free capacity for the requested quantity.
    #[error("Insufficient capacity for event {event_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Event that is full
        event_id: EventId,
        /// Units requested
        requested: u32,
        /// Units free at the time of the check
        available: u32,
    },

    /// Quantity outside `1..=max`.
    #[error("Invalid quantity {quantity}: must be between 1 and {max}")]
    InvalidQuantity {
        /// Quantity supplied
        quantity: u32,
        /// Largest quantity accepted per request
        max: u32,
    },

    /// Referenced record does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of record ("booking", "event", "waitlist entry")
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Status transition not allowed from the record's current status.
    #[error("Invalid state for {resource} {id}: {reason}")]
    InvalidState {
        /// Kind of record
        resource: &'static str,
        /// Record identifier
        id: String,
        /// Why the transition was refused
        reason: String,
    },

    /// Requester already holds a WAITING entry for this event.
    #[error("Requester {requester_id} is already waiting for event {event_id}")]
    AlreadyWaitlisted {
        /// Event
        event_id: EventId,
        /// Requester
        requester_id: RequesterId,
    },

    // ═══════════════════════════════════════════════════════════
    // Transient Errors
    // ═══════════════════════════════════════════════════════════

    /// Durable store could not be reached or aborted the transaction.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Lock contention, duplicate in-flight submission or transaction timeout.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    // ═══════════════════════════════════════════════════════════
    // Invariant Violations
    // ═══════════════════════════════════════════════════════════

    /// Stored state contradicts the model (negative reservation, duplicate position).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl BookingError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientCapacity { .. }
            | Self::InvalidQuantity { .. }
            | Self::NotFound { .. }
            | Self::InvalidState { .. }
            | Self::AlreadyWaitlisted { .. } => ErrorKind::User,
            Self::StoreUnavailable(_) | Self::LockTimeout(_) => ErrorKind::Transient,
            Self::InvariantViolation(_) => ErrorKind::Invariant,
        }
    }

    /// Returns `true` if the caller may retry the operation with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Returns `true` for [`BookingError::InsufficientCapacity`].
    #[must_use]
    pub const fn is_insufficient_capacity(&self) -> bool {
        matches!(self, Self::InsufficientCapacity { .. })
    }

    /// Shorthand for a [`BookingError::NotFound`].
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let user = BookingError::InsufficientCapacity {
            event_id: EventId::new(),
            requested: 2,
            available: 1,
        };
        assert_eq!(user.kind(), ErrorKind::User);
        assert!(!user.is_retryable());
        assert!(user.is_insufficient_capacity());

        let transient = BookingError::StoreUnavailable("connection reset".to_string());
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert!(transient.is_retryable());
        assert!(BookingError::LockTimeout("busy".to_string()).is_retryable());

        let fatal = BookingError::InvariantViolation("reserved < 0".to_string());
        assert_eq!(fatal.kind(), ErrorKind::Invariant);
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let error = BookingError::InvalidQuantity { quantity: 0, max: 10 };
        assert_eq!(
            error.to_string(),
            "Invalid quantity 0: must be between 1 and 10"
        );

        let error = BookingError::not_found("booking", "abc");
        assert_eq!(error.to_string(), "booking not found: abc");
    }
}
