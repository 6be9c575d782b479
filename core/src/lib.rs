//! # Seatkeeper Core
//!
//! Data model, error taxonomy and service seams for allocating finite,
//! shared event capacity among concurrent requesters.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **Types**: `EventInventory`, `Booking`, `WaitlistEntry` and their identifiers
//! - **Errors**: [`BookingError`] classified into user, transient and invariant failures
//! - **Store**: [`store::BookingStore`] / [`store::StoreTransaction`], the durable store
//!   contract with per-event exclusive row locks
//! - **Lock**: [`lock::LockCoordinator`], the best-effort duplicate-submission guard
//! - **Queue**: [`queue::PromotionQueue`] / [`queue::PromotionSource`], the
//!   at-least-once promotion message channel
//! - **Notify**: [`notify::Notifier`], fire-and-forget outbound notifications
//! - **Environment**: [`environment::Clock`] for deterministic time
//!
//! ## Implementations
//!
//! - `seatkeeper-postgres`: `PostgresStore`
//! - `seatkeeper-redis`: `RedisLockCoordinator`, `RedisPromotionQueue`, `RedisNotifier`
//! - `seatkeeper-runtime`: `ChannelPromotionQueue`
//! - `seatkeeper-testing`: in-memory store, lock coordinator and recording notifier
//!
//! ## Ownership
//!
//! ```text
//! EventInventory ──1:N── Booking          (only the Capacity Ledger mutates inventory,
//!        │                                  always inside the transaction that writes
//!        └──────1:N── WaitlistEntry         the matching booking / entry record)
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod lock;
pub mod notify;
pub mod queue;
pub mod store;
pub mod types;

pub use error::{BookingError, ErrorKind, Result};
pub use types::*;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the services that need them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
