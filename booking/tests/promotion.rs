//! Promotion Worker: freed capacity flows to the waitlist in position order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Harness;
use seatkeeper_core::notify::Notification;
use seatkeeper_core::queue::{PromotionCheck, PromotionQueue, PromotionReason};
use seatkeeper_core::{BookingStatus, EventId, RequesterId, WaitlistEntry, WaitlistStatus};
use seatkeeper_runtime::{ChannelPromotionQueue, ShutdownCoordinator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

impl Harness {
    async fn fill(&self, event_id: EventId, quantity: u32) -> seatkeeper_core::Booking {
        self.services
            .coordinator
            .create(event_id, RequesterId::new(), quantity)
            .await
            .unwrap()
    }

    async fn wait(&self, event_id: EventId, quantity: u32) -> WaitlistEntry {
        self.services
            .waitlist
            .join(event_id, RequesterId::new(), quantity)
            .await
            .unwrap()
    }

    /// Run the check the last cancellation enqueued.
    async fn deliver_last_check(&self) -> booking::PromotionReport {
        let check = self.queue.checks().pop().expect("a promotion check was enqueued");
        self.services.worker.process(&check).await.unwrap()
    }
}

#[tokio::test]
async fn cancellation_promotes_waiting_entry() {
    let harness = Harness::new();
    let event_id = harness.event(2).await;
    let held = harness.fill(event_id, 2).await;
    let waiting = harness.wait(event_id, 2).await;

    harness.services.coordinator.cancel(held.id).await.unwrap();
    assert_eq!(harness.reserved(event_id).await, 0);

    let report = harness.deliver_last_check().await;

    assert_eq!(report.promoted, vec![waiting.id]);
    assert!(report.skipped.is_empty() && report.failed.is_empty());
    assert_eq!(harness.reserved(event_id).await, 2);

    let promoted = harness.services.waitlist.get_entry(waiting.id).await.unwrap();
    assert_eq!(promoted.status, WaitlistStatus::Promoted);
    assert_eq!(promoted.promoted_at, Some(harness.clock_now()));
    let booking_id = promoted.promoted_booking_id.expect("promotion links its booking");
    let booking = harness.services.coordinator.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.requester_id, waiting.requester_id);
    assert_eq!((booking.quantity, booking.status), (2, BookingStatus::Confirmed));
    harness.assert_consistent(event_id).await;

    let sent = harness.notifier.wait_for(3, Duration::from_secs(1)).await;
    assert!(sent.contains(&Notification::WaitlistPromoted {
        entry: promoted,
        booking,
    }));
}

#[tokio::test]
async fn entry_larger_than_freed_capacity_is_skipped() {
    let harness = Harness::new();
    let event_id = harness.event(3).await;
    let small = harness.fill(event_id, 1).await;
    harness.fill(event_id, 2).await;
    let first = harness.wait(event_id, 3).await;
    let second = harness.wait(event_id, 1).await;

    harness.services.coordinator.cancel(small.id).await.unwrap();
    let report = harness.deliver_last_check().await;

    assert_eq!(report.skipped, vec![first.id]);
    assert_eq!(report.promoted, vec![second.id]);
    assert!(harness.services.waitlist.get_entry(first.id).await.unwrap().is_waiting());
    assert_eq!(harness.reserved(event_id).await, 3);
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn redelivered_check_promotes_each_entry_once() {
    let harness = Harness::new();
    let event_id = harness.event(2).await;
    let held = harness.fill(event_id, 2).await;
    let waiting = harness.wait(event_id, 1).await;
    harness.services.coordinator.cancel(held.id).await.unwrap();

    let check = harness.queue.checks()[0].clone();
    let first = harness.services.worker.process(&check).await.unwrap();
    let second = harness.services.worker.process(&check).await.unwrap();

    assert_eq!(first.promoted, vec![waiting.id]);
    assert!(second.promoted.is_empty());
    let bookings = harness.services.coordinator.bookings_for_requester(waiting.requester_id).await.unwrap();
    assert_eq!(bookings.len(), 1);
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn promotions_follow_position_order() {
    let harness = Harness::new();
    let event_id = harness.event(4).await;
    let held = harness.fill(event_id, 4).await;
    let mut entries = Vec::new();
    for quantity in [1, 2, 1, 1] {
        entries.push(harness.wait(event_id, quantity).await);
    }

    harness.services.coordinator.cancel(held.id).await.unwrap();
    let report = harness.deliver_last_check().await;

    assert_eq!(
        report.promoted,
        vec![entries[0].id, entries[1].id, entries[2].id]
    );
    assert!(harness.services.waitlist.get_entry(entries[3].id).await.unwrap().is_waiting());
    assert_eq!(harness.reserved(event_id).await, 4);
}

#[tokio::test]
async fn failed_promotion_does_not_block_later_entries() {
    let harness = Harness::new();
    let event_id = harness.event(2).await;
    let first = harness.wait(event_id, 1).await;
    let second = harness.wait(event_id, 1).await;
    harness.store.fail_next_booking_insert();

    let report = harness.services.worker.run_once(event_id).await.unwrap();

    assert_eq!(report.failed, vec![first.id]);
    assert_eq!(report.promoted, vec![second.id]);
    assert!(harness.services.waitlist.get_entry(first.id).await.unwrap().is_waiting());
    assert_eq!(harness.reserved(event_id).await, 1);

    // Next signal picks the failed entry up again
    let retry = harness.services.worker.run_once(event_id).await.unwrap();
    assert_eq!(retry.promoted, vec![first.id]);
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn failed_commit_promotes_nobody() {
    let harness = Harness::new();
    let event_id = harness.event(2).await;
    let first = harness.wait(event_id, 1).await;
    let second = harness.wait(event_id, 1).await;
    harness.store.fail_next_commit();

    let err = harness.services.worker.run_once(event_id).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(harness.store.all_bookings().is_empty());
    assert_eq!(harness.reserved(event_id).await, 0);
    for entry in [&first, &second] {
        assert!(harness.services.waitlist.get_entry(entry.id).await.unwrap().is_waiting());
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.notifier.notifications().is_empty());

    let retry = harness.services.worker.run_once(event_id).await.unwrap();
    assert_eq!(retry.promoted, vec![first.id, second.id]);
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn cancellation_waits_for_running_promotion() {
    let harness = Harness::new();
    let event_id = harness.event(4).await;
    let held = harness.fill(event_id, 3).await;
    let first = harness.wait(event_id, 2).await;
    let second = harness.wait(event_id, 2).await;
    let third = harness.wait(event_id, 1).await;
    harness.store.set_scan_delay(Some(Duration::from_millis(30)));

    let worker = harness.services.worker.clone();
    let run = tokio::spawn(async move { worker.run_once(event_id).await });
    // Let the run take the inventory lock and start scanning
    tokio::time::sleep(Duration::from_millis(10)).await;
    let coordinator = harness.services.coordinator.clone();
    let cancel = tokio::spawn(async move { coordinator.cancel(held.id).await });

    // The run decides on the single free unit it saw when it started
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.skipped, vec![first.id, second.id]);
    assert_eq!(report.promoted, vec![third.id]);

    cancel.await.unwrap().unwrap();
    harness.store.set_scan_delay(None);
    assert_eq!(harness.reserved(event_id).await, 1);

    // The freed capacity goes to the earliest entry that fits
    let report = harness.deliver_last_check().await;
    assert_eq!(report.promoted, vec![first.id]);
    assert_eq!(report.skipped, vec![second.id]);
    assert!(harness.services.waitlist.get_entry(second.id).await.unwrap().is_waiting());
    assert_eq!(harness.reserved(event_id).await, 3);
    harness.assert_consistent(event_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_never_double_promote() {
    let harness = Harness::new();
    let event_id = harness.event(3).await;
    for _ in 0..6 {
        harness.wait(event_id, 1).await;
    }

    let mut runs = JoinSet::new();
    for _ in 0..4 {
        let worker = harness.services.worker.clone();
        runs.spawn(async move { worker.run_once(event_id).await });
    }

    let mut promoted = Vec::new();
    while let Some(report) = runs.join_next().await {
        promoted.extend(report.unwrap().unwrap().promoted);
    }

    assert_eq!(promoted.len(), 3);
    assert_eq!(promoted.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(harness.store.all_bookings().len(), 3);
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn sweep_enqueues_events_with_waiters() {
    let harness = Harness::new();
    let with_waiters = harness.event(1).await;
    let without = harness.event(1).await;
    harness.fill(with_waiters, 1).await;
    harness.fill(without, 1).await;
    harness.wait(with_waiters, 1).await;

    let enqueued = harness.services.worker.sweep_once().await.unwrap();

    assert_eq!(enqueued, 1);
    let checks = harness.queue.checks();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].event_id, with_waiters);
    assert_eq!(checks[0].reason, PromotionReason::Sweep);
}

#[tokio::test]
async fn sweeper_runs_until_shutdown() {
    let harness = Harness::new();
    let event_id = harness.event(0).await;
    harness.wait(event_id, 1).await;

    let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(2));
    let worker = harness.services.worker.clone();
    let signal = shutdown.subscribe();
    shutdown.track("sweeper", tokio::spawn(async move { worker.run_sweeper(signal).await }));

    // First tick fires immediately
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while harness.queue.checks().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.queue.checks()[0].event_id, event_id);

    assert!(shutdown.shutdown().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumer_processes_checks_and_stops_on_shutdown() {
    let harness = Harness::new();
    let event_id = harness.event(1).await;
    let waiting = harness.wait(event_id, 1).await;
    let queue = Arc::new(ChannelPromotionQueue::new(Duration::from_millis(10)));

    let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(2));
    let worker = harness.services.worker.clone();
    let source = queue.clone();
    let signal = shutdown.subscribe();
    shutdown.track("consumer", tokio::spawn(async move { worker.run(source, signal).await }));

    queue
        .enqueue(PromotionCheck::new(event_id, PromotionReason::Manual, harness.clock_now()))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entry = harness.services.waitlist.get_entry(waiting.id).await.unwrap();
        if entry.status == WaitlistStatus::Promoted {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "entry was never promoted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(shutdown.shutdown().await.is_empty());
    harness.assert_consistent(event_id).await;
}

#[tokio::test]
async fn consumer_exits_when_queue_closes() {
    let harness = Harness::new();
    let queue = Arc::new(ChannelPromotionQueue::new(Duration::from_millis(10)));
    let (_tx, signal) = tokio::sync::broadcast::channel(1);

    queue.close();
    tokio::time::timeout(
        Duration::from_secs(2),
        harness.services.worker.run(queue, signal),
    )
    .await
    .expect("consumer must stop once the queue is closed");
}
