//! Waitlist Queue join/withdraw and queries.

#![allow(clippy::unwrap_used)]

mod common;

use booking::BookingSettings;
use common::Harness;
use seatkeeper_core::{
    BookingError, EventId, RequesterId, WaitlistEntryId, WaitlistStats, WaitlistStatus,
};
use std::collections::BTreeSet;
use tokio::task::JoinSet;

#[tokio::test]
async fn joins_take_increasing_positions() {
    let harness = Harness::new();
    let event_id = harness.event(0).await;
    let waitlist = &harness.services.waitlist;

    let mut positions = Vec::new();
    for quantity in [3, 1, 2] {
        let entry = waitlist.join(event_id, RequesterId::new(), quantity).await.unwrap();
        assert_eq!(entry.status, WaitlistStatus::Waiting);
        positions.push(entry.position);
    }
    assert_eq!(positions, vec![1, 2, 3]);

    let waiting = waitlist.waiting_entries(event_id).await.unwrap();
    assert_eq!(
        waiting.iter().map(|e| e.quantity).collect::<Vec<_>>(),
        vec![3, 1, 2]
    );
    assert_eq!(
        waitlist.stats(event_id).await.unwrap(),
        WaitlistStats {
            total_waiting: 3,
            total_quantity_requested: 6,
        }
    );
    assert_eq!(harness.reserved(event_id).await, 0, "joining never reserves");
}

#[tokio::test]
async fn one_waiting_entry_per_requester_and_event() {
    let harness = Harness::new();
    let event_id = harness.event(1).await;
    let other_event = harness.event(1).await;
    let requester_id = RequesterId::new();
    let waitlist = &harness.services.waitlist;

    let first = waitlist.join(event_id, requester_id, 1).await.unwrap();
    let err = waitlist.join(event_id, requester_id, 2).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::AlreadyWaitlisted {
            event_id,
            requester_id,
        }
    );

    // Other events are independent
    waitlist.join(other_event, requester_id, 1).await.unwrap();

    // After leaving, the requester may queue again at the back
    waitlist.withdraw(first.id).await.unwrap();
    let again = waitlist.join(event_id, requester_id, 2).await.unwrap();
    assert_eq!(again.position, 2);

    let mine = waitlist.entries_for_requester(requester_id).await.unwrap();
    assert_eq!(mine.len(), 3);
}

#[tokio::test]
async fn withdraw_is_idempotent() {
    let harness = Harness::new();
    let event_id = harness.event(1).await;
    let waitlist = &harness.services.waitlist;
    let entry = waitlist.join(event_id, RequesterId::new(), 1).await.unwrap();

    let withdrawn = waitlist.withdraw(entry.id).await.unwrap();
    let again = waitlist.withdraw(entry.id).await.unwrap();

    assert_eq!(withdrawn.status, WaitlistStatus::Withdrawn);
    assert_eq!(again, withdrawn);
    assert_eq!(waitlist.get_entry(entry.id).await.unwrap().status, WaitlistStatus::Withdrawn);
    assert_eq!(waitlist.stats(event_id).await.unwrap(), WaitlistStats::default());
}

#[tokio::test]
async fn promoted_entry_cannot_be_withdrawn() {
    let harness = Harness::new();
    let event_id = harness.event(1).await;
    let waitlist = &harness.services.waitlist;
    let entry = waitlist.join(event_id, RequesterId::new(), 1).await.unwrap();

    let report = harness.services.worker.run_once(event_id).await.unwrap();
    assert_eq!(report.promoted, vec![entry.id]);

    let err = waitlist.withdraw(entry.id).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidState { resource: "waitlist entry", .. }));
    assert_eq!(waitlist.get_entry(entry.id).await.unwrap().status, WaitlistStatus::Promoted);
}

#[tokio::test]
async fn invalid_joins_are_rejected() {
    let harness = Harness::with_settings(BookingSettings {
        max_quantity: 2,
        ..BookingSettings::default()
    });
    let event_id = harness.event(1).await;
    let waitlist = &harness.services.waitlist;

    assert!(matches!(
        waitlist.join(EventId::new(), RequesterId::new(), 1).await,
        Err(BookingError::NotFound { resource: "event", .. })
    ));
    assert_eq!(
        waitlist.join(event_id, RequesterId::new(), 3).await.unwrap_err(),
        BookingError::InvalidQuantity { quantity: 3, max: 2 }
    );
    assert!(matches!(
        waitlist.withdraw(WaitlistEntryId::new()).await,
        Err(BookingError::NotFound { .. })
    ));
    assert!(harness.store.all_entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_get_distinct_contiguous_positions() {
    let harness = Harness::new();
    let event_id = harness.event(0).await;

    let mut tasks = JoinSet::new();
    for _ in 0..25 {
        let waitlist = harness.services.waitlist.clone();
        tasks.spawn(async move { waitlist.join(event_id, RequesterId::new(), 1).await });
    }

    let mut positions = BTreeSet::new();
    while let Some(result) = tasks.join_next().await {
        positions.insert(result.unwrap().unwrap().position);
    }

    assert_eq!(positions, (1..=25).collect::<BTreeSet<i64>>());
}
