//! Business metrics for the booking services.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `seatkeeper_bookings_total{outcome}` - Booking attempts by outcome
//! - `seatkeeper_cancellations_total` - Committed cancellations
//! - `seatkeeper_waitlist_joins_total` - Waitlist entries created
//! - `seatkeeper_promotions_total{outcome}` - Promotion attempts by outcome
//! - `seatkeeper_notifications_failed_total` - Notifications dropped after retries
//! - `seatkeeper_invariant_violations_total` - Detected model violations
//!
//! ## Histograms
//! - `seatkeeper_booking_duration_seconds` - Time to serve one booking request

use metrics::{counter, describe_counter, describe_histogram, histogram};
use seatkeeper_core::{BookingError, ErrorKind};
use std::time::Duration;

/// Register all business metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "seatkeeper_bookings_total",
        "Booking attempts by outcome (confirmed, insufficient_capacity, invalid_quantity, duplicate, not_found, transient, invariant)"
    );
    describe_counter!(
        "seatkeeper_cancellations_total",
        "Total number of committed cancellations"
    );
    describe_counter!(
        "seatkeeper_waitlist_joins_total",
        "Total number of waitlist entries created"
    );
    describe_counter!(
        "seatkeeper_promotions_total",
        "Promotion attempts by outcome (promoted, skipped, failed)"
    );
    describe_counter!(
        "seatkeeper_notifications_failed_total",
        "Notifications dropped after exhausting retries"
    );
    describe_counter!(
        "seatkeeper_invariant_violations_total",
        "Stored state found contradicting the model"
    );
    describe_histogram!(
        "seatkeeper_booking_duration_seconds",
        "Time taken to serve one booking request, lock and transaction included"
    );

    tracing::info!("Business metrics registered");
}

/// Label for a booking attempt that ended in `result`.
#[must_use]
pub fn booking_outcome<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "confirmed",
        Err(BookingError::InsufficientCapacity { .. }) => "insufficient_capacity",
        Err(BookingError::InvalidQuantity { .. }) => "invalid_quantity",
        Err(BookingError::LockTimeout(_)) => "duplicate",
        Err(BookingError::NotFound { .. }) => "not_found",
        Err(e) => match e.kind() {
            ErrorKind::Invariant => "invariant",
            ErrorKind::Transient => "transient",
            ErrorKind::User => "rejected",
        },
    }
}

/// Record a booking attempt.
pub fn record_booking<T>(result: &Result<T, BookingError>, duration: Duration) {
    counter!("seatkeeper_bookings_total", "outcome" => booking_outcome(result)).increment(1);
    histogram!("seatkeeper_booking_duration_seconds").record(duration.as_secs_f64());
}

/// Record a committed cancellation.
pub fn record_cancellation() {
    counter!("seatkeeper_cancellations_total").increment(1);
}

/// Record a waitlist join.
pub fn record_waitlist_join() {
    counter!("seatkeeper_waitlist_joins_total").increment(1);
}

/// Record `count` entries of a committed promotion run by outcome:
/// `promoted`, `skipped` or `failed`.
pub fn record_promotions(outcome: &'static str, count: usize) {
    counter!("seatkeeper_promotions_total", "outcome" => outcome).increment(count as u64);
}

/// Record a notification given up on.
pub fn record_notification_failed(kind: &'static str) {
    counter!("seatkeeper_notifications_failed_total", "kind" => kind).increment(1);
}

/// Log and count `err` if it is an invariant violation.
///
/// Invariant violations are never corrected automatically; this is the one
/// place they are made loud.
pub fn observe_error(operation: &'static str, err: &BookingError) {
    if err.kind() == ErrorKind::Invariant {
        counter!("seatkeeper_invariant_violations_total", "operation" => operation).increment(1);
        tracing::error!(operation, error = %err, "Invariant violation");
    }
}
