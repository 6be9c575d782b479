//! # Booking
//!
//! Allocates finite event capacity among concurrent requesters without ever
//! overselling, and hands capacity freed by cancellations to a FIFO waitlist.
//!
//! ## Components
//!
//! - [`CapacityLedger`]: per-event `reserved`/`capacity` counter, mutated only
//!   under the event's exclusive row lock
//! - [`BookingCoordinator`]: create/cancel, coupling every ledger mutation to
//!   its booking record in one transaction
//! - [`WaitlistQueue`]: explicit join/withdraw with per-event monotonic positions
//! - [`PromotionWorker`]: consumes freed-capacity checks and promotes waiting
//!   entries in position order, skipping those that do not fit
//!
//! ## Wiring
//!
//! ```ignore
//! let env = BookingEnvironment::new(store, promotions)
//!     .with_locks(locks)
//!     .with_notifier(notifier);
//! let services = BookingServices::new(env, config.booking, config.promotion);
//!
//! let booking = services.coordinator.create(event_id, requester_id, 2).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod environment;
pub mod ledger;
pub mod metrics;
pub mod waitlist;
pub mod worker;

pub use config::{BookingSettings, Config, ConfigError, PromotionPolicy, PromotionSettings};
pub use coordinator::BookingCoordinator;
pub use dispatch::NotificationDispatcher;
pub use environment::BookingEnvironment;
pub use ledger::CapacityLedger;
pub use waitlist::WaitlistQueue;
pub use worker::{PromotionReport, PromotionWorker};

/// The four components wired to one environment.
#[derive(Clone)]
pub struct BookingServices {
    /// Capacity counters
    pub ledger: CapacityLedger,
    /// Request-path create/cancel
    pub coordinator: BookingCoordinator,
    /// Waitlist join/withdraw
    pub waitlist: WaitlistQueue,
    /// Background promotion
    pub worker: PromotionWorker,
}

impl BookingServices {
    /// Build every component over `env`.
    #[must_use]
    pub fn new(
        env: BookingEnvironment,
        booking: BookingSettings,
        promotion: PromotionSettings,
    ) -> Self {
        let coordinator = BookingCoordinator::new(env.clone(), booking.clone());
        Self {
            ledger: coordinator.ledger().clone(),
            waitlist: WaitlistQueue::new(env, booking),
            worker: PromotionWorker::new(coordinator.clone(), promotion),
            coordinator,
        }
    }

    /// Send notifications through `dispatcher` from both the request path and
    /// promotion.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.coordinator = self.coordinator.with_dispatcher(dispatcher);
        self.worker = self.worker.with_coordinator(self.coordinator.clone());
        self
    }
}
