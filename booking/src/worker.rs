//! Promotion Worker: hands freed capacity to the waitlist.
//!
//! A run for one event is a single transaction that holds the event's
//! inventory row lock from the first read to commit:
//!
//! ```text
//! begin
//!   loop
//!     lock inventory            (reentrant; same row lock as reserve/release)
//!     available == 0?           → stop
//!     lock lowest WAITING entry after the cursor, re-check WAITING
//!     none left?                → stop
//!     too large for available?  → skip, advance cursor
//!     savepoint ─ reserve + insert booking + mark PROMOTED
//!       ok    → release savepoint
//!       error → roll back to savepoint, report failed
//! commit → notify WaitlistPromoted for each promoted entry
//! ```
//!
//! While a run is open no cancellation, booking or other run can touch the
//! event's capacity, so every decision in the scan sees the same inventory
//! and runs for one event are single-flight across every process sharing
//! the store. The WAITING re-check under the entry lock makes a redelivered
//! [`PromotionCheck`] a no-op for entries an earlier run already promoted.

use crate::config::{PromotionPolicy, PromotionSettings};
use crate::coordinator::{BookingCoordinator, bounded, finish};
use crate::metrics;
use seatkeeper_core::notify::Notification;
use seatkeeper_core::queue::{PromotionCheck, PromotionReason, PromotionSource, QueueError};
use seatkeeper_core::store::StoreTransaction;
use seatkeeper_core::{Booking, EventId, Result, WaitlistEntry, WaitlistEntryId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Outcome of one promotion run for one event, each list in position order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromotionReport {
    /// Event the run covered
    pub event_id: EventId,
    /// Entries converted into bookings
    pub promoted: Vec<WaitlistEntryId>,
    /// Entries left WAITING because they did not fit
    pub skipped: Vec<WaitlistEntryId>,
    /// Entries whose promotion failed and was rolled back
    pub failed: Vec<WaitlistEntryId>,
}

impl PromotionReport {
    fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            ..Self::default()
        }
    }
}

/// A scan that has not been committed yet.
struct Scan {
    report: PromotionReport,
    promoted: Vec<(WaitlistEntry, Booking)>,
}

/// Background consumer of promotion checks.
#[derive(Clone)]
pub struct PromotionWorker {
    coordinator: BookingCoordinator,
    settings: PromotionSettings,
}

impl PromotionWorker {
    /// Create a worker that books through `coordinator`.
    #[must_use]
    pub const fn new(coordinator: BookingCoordinator, settings: PromotionSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub(crate) fn with_coordinator(mut self, coordinator: BookingCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Promote as many WAITING entries of `event_id` as currently fit.
    ///
    /// Entries are tried in ascending position. One that is larger than the
    /// free capacity is skipped and stays WAITING; one whose promotion fails
    /// is rolled back to its savepoint and reported as failed. Neither stops
    /// the scan. Nothing is promoted, and nobody is notified, unless the run
    /// commits.
    ///
    /// # Errors
    ///
    /// Returns the error if the event itself cannot be read or locked
    /// (`NotFound`, `StoreUnavailable`, `LockTimeout`), or if the run could
    /// not be committed. Either way no entry was promoted.
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn run_once(&self, event_id: EventId) -> Result<PromotionReport> {
        let limit = self.coordinator.settings().transaction_timeout;
        let (tx, scan) = bounded(limit, async {
            let mut tx = self.coordinator.env().store.begin().await?;
            let scan = self.scan(tx.as_mut(), event_id).await;
            Ok((tx, scan))
        })
        .await?;
        let scan = finish(tx, scan).await?;

        metrics::record_promotions("promoted", scan.promoted.len());
        metrics::record_promotions("skipped", scan.report.skipped.len());
        metrics::record_promotions("failed", scan.report.failed.len());
        for (entry, booking) in scan.promoted {
            tracing::info!(
                entry_id = %entry.id,
                booking_id = %booking.id,
                position = entry.position,
                "Waitlist entry promoted"
            );
            self.coordinator
                .dispatcher()
                .dispatch(Notification::WaitlistPromoted { entry, booking });
        }
        Ok(scan.report)
    }

    async fn scan(&self, tx: &mut dyn StoreTransaction, event_id: EventId) -> Result<Scan> {
        let mut scan = Scan {
            report: PromotionReport::new(event_id),
            promoted: Vec::new(),
        };
        let mut cursor = None;

        loop {
            // Re-read every step: a rolled-back savepoint undoes its reservation
            let inventory = self.coordinator.ledger().lock(tx, event_id).await?;
            if inventory.available() == 0 {
                break;
            }
            let Some(entry) = tx.next_waiting_entry(event_id, cursor).await? else {
                break;
            };
            cursor = Some(entry.position);

            if !inventory.can_fit(entry.quantity) {
                tracing::debug!(
                    entry_id = %entry.id,
                    position = entry.position,
                    quantity = entry.quantity,
                    available = inventory.available(),
                    "Entry does not fit, skipping"
                );
                scan.report.skipped.push(entry.id);
                continue;
            }

            tx.savepoint().await?;
            match self.promote_in_tx(tx, entry.clone()).await {
                Ok((entry, booking)) => {
                    tx.release_savepoint().await?;
                    scan.report.promoted.push(entry.id);
                    scan.promoted.push((entry, booking));
                }
                Err(error) => {
                    tx.rollback_to_savepoint().await?;
                    metrics::observe_error("promote", &error);
                    tracing::warn!(
                        entry_id = %entry.id,
                        position = entry.position,
                        error = %error,
                        "Promotion failed, continuing with next entry"
                    );
                    scan.report.failed.push(entry.id);
                }
            }
        }

        Ok(scan)
    }

    async fn promote_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        mut entry: WaitlistEntry,
    ) -> Result<(WaitlistEntry, Booking)> {
        match self.settings.policy {
            PromotionPolicy::AutoConfirm => {
                let booking = self
                    .coordinator
                    .book_in_tx(tx, entry.event_id, entry.requester_id, entry.quantity)
                    .await?;
                entry.promote(booking.id, self.coordinator.env().clock.now())?;
                tx.update_waitlist_entry(&entry).await?;
                Ok((entry, booking))
            }
        }
    }

    /// Handle one promotion check.
    ///
    /// # Errors
    ///
    /// See [`Self::run_once`].
    pub async fn process(&self, check: &PromotionCheck) -> Result<PromotionReport> {
        tracing::debug!(
            event_id = %check.event_id,
            reason = check.reason.as_str(),
            "Processing promotion check"
        );
        self.run_once(check.event_id).await
    }

    async fn handle(&self, check: &PromotionCheck) {
        match self.process(check).await {
            Ok(report) => {
                if !(report.promoted.is_empty() && report.failed.is_empty()) {
                    tracing::info!(
                        event_id = %report.event_id,
                        reason = check.reason.as_str(),
                        promoted = report.promoted.len(),
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "Promotion run finished"
                    );
                }
            }
            Err(e) => {
                metrics::observe_error("promotion_run", &e);
                tracing::warn!(
                    event_id = %check.event_id,
                    error = %e,
                    "Promotion run aborted; next sweep will retry"
                );
            }
        }
    }

    /// Consume promotion checks until `shutdown` fires or the source closes.
    ///
    /// A check is acknowledged only after it was processed, so a crash
    /// mid-run leads to redelivery rather than loss.
    pub async fn run(&self, source: Arc<dyn PromotionSource>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(policy = %self.settings.policy, "Promotion worker started");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Promotion worker received shutdown signal");
                    break;
                }
                received = source.next_delivery() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    self.handle(&delivery.check).await;
                    if let Err(e) = source.ack(delivery).await {
                        tracing::warn!(error = %e, "Failed to acknowledge promotion check");
                    }
                }
                Ok(None) => {}
                Err(QueueError::Closed) => {
                    tracing::info!("Promotion queue closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive promotion check");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }

        tracing::info!("Promotion worker stopped");
    }

    /// Enqueue a `Sweep` check for every event that has WAITING entries.
    ///
    /// Covers cancellations whose signal was lost.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the events could not be listed.
    pub async fn sweep_once(&self) -> Result<usize> {
        let env = self.coordinator.env();
        let events = env.store.events_with_waiting_entries().await?;
        let now = env.clock.now();

        let mut enqueued = 0;
        for event_id in events {
            let check = PromotionCheck::new(event_id, PromotionReason::Sweep, now);
            match env.promotions.enqueue(check).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    tracing::warn!(event_id = %event_id, error = %e, "Failed to enqueue sweep check");
                }
            }
        }

        tracing::debug!(enqueued, "Sweep finished");
        Ok(enqueued)
    }

    /// Run [`Self::sweep_once`] every `sweep_interval` until `shutdown` fires.
    pub async fn run_sweeper(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.settings.sweep_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Promotion sweeper started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Promotion sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "Sweep failed");
                    }
                }
            }
        }
    }
}
