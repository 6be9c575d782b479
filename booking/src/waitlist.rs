//! Waitlist Queue: per-event FIFO of requests that did not fit.
//!
//! Joining is explicit; a failed booking never enrolls anyone on its own.
//! Positions come from a per-event counter read under the event's inventory
//! row lock, so two joins for one event can never take the same position.

use crate::config::BookingSettings;
use crate::coordinator::{bounded, finish, validate_quantity};
use crate::environment::BookingEnvironment;
use crate::ledger::CapacityLedger;
use crate::metrics;
use seatkeeper_core::store::StoreTransaction;
use seatkeeper_core::{
    BookingError, EventId, RequesterId, Result, WaitlistEntry, WaitlistEntryId, WaitlistStats,
};

/// Ordered per-event waitlist.
#[derive(Clone)]
pub struct WaitlistQueue {
    env: BookingEnvironment,
    ledger: CapacityLedger,
    settings: BookingSettings,
}

impl WaitlistQueue {
    /// Create a waitlist queue.
    #[must_use]
    pub fn new(env: BookingEnvironment, settings: BookingSettings) -> Self {
        let ledger = CapacityLedger::new(env.store.clone());
        Self {
            env,
            ledger,
            settings,
        }
    }

    /// Append a WAITING entry for `requester_id` at the next position.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity` if `quantity` is 0 or above the configured maximum
    /// - `NotFound` if the event was never provisioned
    /// - `AlreadyWaitlisted` if the requester already has a WAITING entry here
    /// - `LockTimeout` / `StoreUnavailable` on transient failure
    /// - `InvariantViolation` if the position is already taken
    #[tracing::instrument(
        skip_all,
        fields(event_id = %event_id, requester_id = %requester_id, quantity = quantity)
    )]
    pub async fn join(
        &self,
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
    ) -> Result<WaitlistEntry> {
        validate_quantity(quantity, self.settings.max_quantity)?;

        let result: Result<_> = async {
            let (tx, outcome) = bounded(self.settings.transaction_timeout, async {
                let mut tx = self.env.store.begin().await?;
                let outcome = self
                    .join_in_tx(tx.as_mut(), event_id, requester_id, quantity)
                    .await;
                Ok((tx, outcome))
            })
            .await?;
            finish(tx, outcome).await
        }
        .await;

        match &result {
            Ok(entry) => {
                metrics::record_waitlist_join();
                tracing::info!(entry_id = %entry.id, position = entry.position, "Joined waitlist");
            }
            Err(e) => {
                metrics::observe_error("join", e);
                tracing::debug!(error = %e, "Waitlist join rejected");
            }
        }
        result
    }

    async fn join_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        event_id: EventId,
        requester_id: RequesterId,
        quantity: u32,
    ) -> Result<WaitlistEntry> {
        // Serializes position assignment with every other writer of this event
        self.ledger.lock(tx, event_id).await?;

        if tx.waiting_entry_for(event_id, requester_id).await?.is_some() {
            return Err(BookingError::AlreadyWaitlisted {
                event_id,
                requester_id,
            });
        }

        let position = tx.next_waitlist_position(event_id).await?;
        let entry = WaitlistEntry::waiting(
            event_id,
            requester_id,
            quantity,
            position,
            self.env.clock.now(),
        );
        tx.insert_waitlist_entry(&entry).await?;
        Ok(entry)
    }

    /// Leave the waitlist. Withdrawing twice is harmless.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the entry does not exist
    /// - `InvalidState` if the entry was already promoted or expired
    #[tracing::instrument(skip_all, fields(entry_id = %entry_id))]
    pub async fn withdraw(&self, entry_id: WaitlistEntryId) -> Result<WaitlistEntry> {
        let (tx, outcome) = bounded(self.settings.transaction_timeout, async {
            let mut tx = self.env.store.begin().await?;
            let outcome = Self::withdraw_in_tx(tx.as_mut(), entry_id).await;
            Ok((tx, outcome))
        })
        .await?;
        finish(tx, outcome).await
    }

    async fn withdraw_in_tx(
        tx: &mut dyn StoreTransaction,
        entry_id: WaitlistEntryId,
    ) -> Result<WaitlistEntry> {
        let mut entry = tx
            .lock_waitlist_entry(entry_id)
            .await?
            .ok_or_else(|| BookingError::not_found("waitlist entry", entry_id))?;

        if entry.withdraw()? {
            tx.update_waitlist_entry(&entry).await?;
            tracing::info!(event_id = %entry.event_id, "Left waitlist");
        }
        Ok(entry)
    }

    /// Look up an entry.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub async fn get_entry(&self, entry_id: WaitlistEntryId) -> Result<WaitlistEntry> {
        self.env
            .store
            .waitlist_entry(entry_id)
            .await?
            .ok_or_else(|| BookingError::not_found("waitlist entry", entry_id))
    }

    /// WAITING entries for an event in promotion order.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn waiting_entries(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        self.env.store.waiting_entries(event_id).await
    }

    /// Every entry a requester ever created, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn entries_for_requester(&self, requester_id: RequesterId) -> Result<Vec<WaitlistEntry>> {
        self.env.store.waitlist_entries_for_requester(requester_id).await
    }

    /// How many are waiting for an event and for how many units.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn stats(&self, event_id: EventId) -> Result<WaitlistStats> {
        let waiting = self.waiting_entries(event_id).await?;
        Ok(WaitlistStats::from_entries(&waiting))
    }
}
