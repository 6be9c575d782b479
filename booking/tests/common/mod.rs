//! Shared wiring for the booking integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use booking::{
    BookingEnvironment, BookingServices, BookingSettings, NotificationDispatcher,
    PromotionSettings,
};
use seatkeeper_core::environment::Clock;
use seatkeeper_core::store::BookingStore;
use seatkeeper_core::{BookingStatus, DateTime, EventId, Utc};
use seatkeeper_runtime::RetryPolicy;
use seatkeeper_testing::{
    InMemoryLockCoordinator, InMemoryStore, ManualClock, RecordingNotifier,
    RecordingPromotionQueue,
};
use std::sync::Arc;
use std::time::Duration;

/// Services over in-memory doubles, with handles to every double.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub locks: Arc<InMemoryLockCoordinator>,
    pub queue: Arc<RecordingPromotionQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub services: BookingServices,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(BookingSettings::default())
    }

    pub fn with_settings(settings: BookingSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let locks = Arc::new(InMemoryLockCoordinator::new(clock.clone()));
        let queue = Arc::new(RecordingPromotionQueue::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let env = BookingEnvironment::new(store.clone(), queue.clone())
            .with_locks(locks.clone())
            .with_notifier(notifier.clone())
            .with_clock(clock.clone());
        let dispatcher = NotificationDispatcher::with_policy(
            notifier.clone(),
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .jitter(0.0)
                .build(),
        );
        let services = BookingServices::new(env, settings, PromotionSettings::default())
            .with_dispatcher(dispatcher);

        Self {
            store,
            locks,
            queue,
            notifier,
            clock,
            services,
        }
    }

    /// Provision a fresh event.
    pub async fn event(&self, capacity: u32) -> EventId {
        let event_id = EventId::new();
        self.services.ledger.provision(event_id, capacity).await.unwrap();
        event_id
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// `reserved` as committed.
    pub async fn reserved(&self, event_id: EventId) -> u32 {
        self.services.ledger.inventory(event_id).await.unwrap().reserved
    }

    /// Checks `reserved == Σ CONFIRMED quantity` and `reserved <= capacity`.
    pub async fn assert_consistent(&self, event_id: EventId) {
        let inventory = self.store.inventory(event_id).await.unwrap().unwrap();
        let confirmed: u32 = self
            .store
            .bookings_for_event(event_id)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .map(|b| b.quantity)
            .sum();

        assert_eq!(
            inventory.reserved, confirmed,
            "reserved must equal confirmed quantity"
        );
        assert!(inventory.reserved <= inventory.capacity, "oversold");
    }
}
