//! # Seatkeeper Testing
//!
//! In-memory doubles for the Seatkeeper service seams.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a [`BookingStore`](seatkeeper_core::store::BookingStore)
//!   with real per-row lock semantics, staged commits and fault injection
//! - [`InMemoryLockCoordinator`]: clock-driven TTL locks
//! - [`RecordingNotifier`] / [`RecordingPromotionQueue`]: capture what was sent
//! - [`FixedClock`] / [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use seatkeeper_testing::{InMemoryStore, RecordingPromotionQueue};
//!
//! #[tokio::test]
//! async fn books_a_seat() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let env = BookingEnvironment::new(store, Arc::new(RecordingPromotionQueue::new()));
//!     let coordinator = BookingCoordinator::new(env, BookingSettings::default());
//!     let booking = coordinator.create(event_id, requester_id, 2).await.unwrap();
//!     assert!(booking.is_confirmed());
//! }
//! ```

use chrono::{DateTime, Utc};
use seatkeeper_core::environment::Clock;

mod lock;
mod recording;
mod store;

pub use lock::InMemoryLockCoordinator;
pub use recording::{RecordingNotifier, RecordingPromotionQueue};
pub use store::InMemoryStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatkeeper_testing::mocks::FixedClock;
    /// use seatkeeper_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Starts at the same instant as [`test_clock`].
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
        ///
        /// # Panics
        ///
        /// Panics if the clock mutex is poisoned or `by` overflows the calendar.
        #[allow(clippy::unwrap_used, clippy::expect_used)]
        pub fn advance(&self, by: Duration) {
            let by = chrono::Duration::from_std(by).expect("advance fits in chrono::Duration");
            *self.time.lock().unwrap() += by;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
