//! Injected dependencies shared by the booking services.

use seatkeeper_core::environment::{Clock, SystemClock};
use seatkeeper_core::lock::LockCoordinator;
use seatkeeper_core::notify::{LogNotifier, Notifier};
use seatkeeper_core::queue::PromotionQueue;
use seatkeeper_core::store::BookingStore;
use std::sync::Arc;

/// Everything the coordinator, waitlist and worker talk to.
///
/// Production wires Postgres and Redis implementations in; tests use the
/// in-memory doubles from `seatkeeper-testing`.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Durable store with per-row exclusive locks
    pub store: Arc<dyn BookingStore>,
    /// Duplicate-submission guard; `None` runs without one
    pub locks: Option<Arc<dyn LockCoordinator>>,
    /// Where freed-capacity signals are sent
    pub promotions: Arc<dyn PromotionQueue>,
    /// Outbound notification sink
    pub notifier: Arc<dyn Notifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl BookingEnvironment {
    /// Environment with no lock coordinator, logging notifier and system clock.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, promotions: Arc<dyn PromotionQueue>) -> Self {
        Self {
            store,
            locks: None,
            promotions,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `locks` for duplicate-submission rejection.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<dyn LockCoordinator>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Send notifications through `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
