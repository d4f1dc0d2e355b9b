//! Races between claims, confirmations, cancellations and sweeps.
//!
//! These run on a multi-threaded runtime so the operations genuinely overlap.

mod common;

use crate::common::{claim, reserve, TestHarness};
use futures::future::join_all;
use sponsorship_core::common::{OperationContext, SponsorshipError};
use sponsorship_core::domains::children::ChildStatus;
use sponsorship_core::domains::reservations::{
    HoldWindow, ReservationStatus, ReservationType,
};
use sponsorship_core::kernel::BaseSponsorshipStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_of_many_concurrent_claims_wins() {
    let ctx = TestHarness::new();
    let ids = ctx.store.seed_family("37", &["A"]).await;

    let attempts = (0..16).map(|n| {
        let service = ctx.service.clone();
        let ids = ids.clone();
        tokio::spawn(async move { reserve(&service, &format!("Sponsor{}", n), &ids).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        SponsorshipError::Unavailable { display_ids, .. } if display_ids == &vec!["37A".to_string()]
    )));

    let child = ctx.store.find_child(ids[0]).await.unwrap().unwrap();
    assert!(child.is_held_by(winners[0].reservation_id));
    let selected = ctx
        .store
        .reservations()
        .await
        .into_iter()
        .filter(|r| r.status == ReservationStatus::Selected)
        .count();
    assert_eq!(selected, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_family_claims_never_split_a_family() {
    let ctx = TestHarness::new();
    let ids = ctx.store.seed_family("5", &["A", "B", "C"]).await;

    let attempts = ids.iter().map(|seed| {
        let service = ctx.service.clone();
        let seed = *seed;
        tokio::spawn(async move {
            service
                .create_reservation(
                    &OperationContext::sponsor("racer"),
                    claim("Racer", &[seed], ReservationType::Family, HoldWindow::reservation()),
                )
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].child_ids.len(), 3);

    for id in &ids {
        let child = ctx.store.find_child(*id).await.unwrap().unwrap();
        assert!(child.is_held_by(winners[0].reservation_id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_claims_all_succeed() {
    let ctx = TestHarness::new();
    let mut ids = Vec::new();
    for n in 0..8 {
        ids.extend(ctx.store.seed_family(&format!("{}", 100 + n), &["A"]).await);
    }

    let attempts = ids.iter().map(|id| {
        let service = ctx.service.clone();
        let id = *id;
        tokio::spawn(async move { reserve(&service, "Ada", &[id]).await })
    });
    let results = join_all(attempts).await;

    assert!(results.into_iter().all(|r| matches!(r, Ok(Ok(_)))));
    assert_eq!(
        ctx.store.children_with_status(ChildStatus::Selected).await.len(),
        8
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirm_and_cancel_race_has_exactly_one_outcome() {
    let ctx = TestHarness::new();
    let ids = ctx.store.seed_family("12", &["A", "B"]).await;
    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada"),
            claim("Ada", &ids[..1], ReservationType::Sibling, HoldWindow::reservation()),
        )
        .await
        .unwrap();

    let confirm = {
        let service = ctx.service.clone();
        let token = receipt.token.as_str().to_string();
        tokio::spawn(async move {
            service
                .confirm_reservation(&OperationContext::sponsor("ada"), &token)
                .await
        })
    };
    let cancel = {
        let service = ctx.service.clone();
        let token = receipt.token.as_str().to_string();
        tokio::spawn(async move {
            service
                .cancel_reservation(&OperationContext::admin("dana"), &token, None)
                .await
        })
    };
    let confirm = confirm.await.unwrap();
    let cancel = cancel.await.unwrap();

    let stored = ctx
        .store
        .find_reservation(receipt.reservation_id)
        .await
        .unwrap()
        .unwrap();
    let statuses: Vec<ChildStatus> = ctx
        .store
        .find_children(&ids)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.status)
        .collect();

    match (confirm, cancel) {
        (Ok(_), Err(SponsorshipError::AlreadyConfirmed)) => {
            assert_eq!(stored.status, ReservationStatus::Confirmed);
            assert_eq!(statuses, vec![ChildStatus::Sponsored, ChildStatus::Sponsored]);
        }
        (Err(SponsorshipError::AlreadyCancelled), Ok(_)) => {
            assert_eq!(stored.status, ReservationStatus::Cancelled);
            assert_eq!(statuses, vec![ChildStatus::Available, ChildStatus::Available]);
        }
        other => panic!("both or neither transition applied: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sweeps_expire_each_reservation_once() {
    let ctx = TestHarness::new();
    let mut expected_children = 0;
    for n in 0..5 {
        let ids = ctx.store.seed_family(&format!("{}", 200 + n), &["A", "B"]).await;
        expected_children += ids.len();
        ctx.service
            .create_reservation(
                &OperationContext::sponsor("ada"),
                claim("Ada", &ids, ReservationType::Individual, HoldWindow::selection()),
            )
            .await
            .unwrap();
    }
    ctx.advance_hours(3);

    let sweeps = (0..4).map(|_| {
        let service = ctx.service.clone();
        tokio::spawn(async move { service.cleanup_expired(&OperationContext::system()).await })
    });
    let summaries: Vec<_> = join_all(sweeps)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("sweep"))
        .collect();

    let expired: usize = summaries.iter().map(|s| s.expired_count).sum();
    let released: usize = summaries.iter().map(|s| s.released_child_count).sum();
    assert_eq!(expired, 5);
    assert_eq!(released, expected_children);
    assert_eq!(
        ctx.store.children_with_status(ChildStatus::Available).await.len(),
        expected_children
    );
}
