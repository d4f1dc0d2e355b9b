//! Reservation lifecycle: create, read, confirm, cancel.

mod common;

use crate::common::{claim, reserve, sponsor, TestHarness};
use chrono::Duration;
use sponsorship_core::common::{ChildId, OperationContext, ReservationId, SponsorshipError};
use sponsorship_core::domains::children::ChildStatus;
use sponsorship_core::domains::reservations::{
    HoldWindow, NewReservation, ReservationStatus, ReservationType, SponsorshipEventKind,
};
use sponsorship_core::kernel::{BaseSponsorshipStore, FailingNotifier};
use std::sync::Arc;
use test_context::test_context;

async fn status_of(ctx: &TestHarness, id: ChildId) -> ChildStatus {
    ctx.store
        .find_child(id)
        .await
        .expect("store read")
        .expect("child exists")
        .status
}

// =============================================================================
// Create
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn second_claim_on_only_child_is_unavailable(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("37", &["A"]).await;

    let first = reserve(&ctx.service, "Ada", &ids).await.expect("first claim");
    let err = reserve(&ctx.service, "Grace", &ids).await.unwrap_err();

    match err {
        SponsorshipError::Unavailable { display_ids, child_ids } => {
            assert_eq!(display_ids, vec!["37A"]);
            assert_eq!(child_ids, ids);
        }
        other => panic!("expected Unavailable, got {:?}", other),
    }

    let child = ctx.store.find_child(ids[0]).await.unwrap().unwrap();
    assert!(child.is_held_by(first.reservation_id));
    assert_eq!(ctx.store.reservations().await.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn family_claim_skips_sponsored_sibling_and_confirm_leaves_it(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("12", &["A", "B", "C"]).await;
    let earlier = ReservationId::new();
    ctx.store
        .set_child_status(ids[1], ChildStatus::Sponsored, Some(earlier))
        .await;

    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada@example.org"),
            claim("Ada", &ids[..1], ReservationType::Family, HoldWindow::reservation()),
        )
        .await
        .expect("family claim");

    assert_eq!(receipt.child_ids, vec![ids[0], ids[2]]);
    assert_eq!(receipt.display_ids, vec!["12A", "12C"]);

    ctx.service
        .confirm_reservation(
            &OperationContext::sponsor("ada@example.org"),
            receipt.token.as_str(),
        )
        .await
        .expect("confirm");

    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Sponsored);
    assert_eq!(status_of(ctx, ids[2]).await, ChildStatus::Sponsored);

    let untouched = ctx.store.find_child(ids[1]).await.unwrap().unwrap();
    assert_eq!(untouched.status, ChildStatus::Sponsored);
    assert_eq!(untouched.reservation_id, Some(earlier));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn group_claim_with_unavailable_seed_writes_nothing(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("8", &["A", "B", "C"]).await;
    reserve(&ctx.service, "Ada", &ids[1..2]).await.expect("hold 8B");

    let err = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("grace@example.org"),
            claim("Grace", &ids[..2], ReservationType::Sibling, HoldWindow::reservation()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SponsorshipError::Unavailable { ref display_ids, .. } if display_ids == &vec!["8B".to_string()]));
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Available);
    assert_eq!(status_of(ctx, ids[2]).await, ChildStatus::Available);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn inactive_child_cannot_be_reserved(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("9", &["A"]).await;
    ctx.store
        .set_child_status(ids[0], ChildStatus::Inactive, None)
        .await;

    let err = reserve(&ctx.service, "Ada", &ids).await.unwrap_err();
    assert_eq!(err.code(), "unavailable");
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Inactive);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unknown_child_is_not_found(ctx: &TestHarness) {
    let err = reserve(&ctx.service, "Ada", &[ChildId::new(4040)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn invalid_requests_are_rejected_before_any_transaction(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("3", &["A"]).await;
    let ctx_op = OperationContext::sponsor("x");

    let empty = claim("Ada", &[], ReservationType::Individual, HoldWindow::selection());
    let err = ctx.service.create_reservation(&ctx_op, empty).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let bad_email = NewReservation {
        sponsor: sponsorship_core::domains::reservations::SponsorContact::new("Ada", "not-an-email"),
        ..claim("Ada", &ids, ReservationType::Individual, HoldWindow::selection())
    };
    let err = ctx.service.create_reservation(&ctx_op, bad_email).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let nameless = NewReservation {
        sponsor: sponsorship_core::domains::reservations::SponsorContact::new("  ", "ada@example.org"),
        ..claim("Ada", &ids, ReservationType::Individual, HoldWindow::selection())
    };
    let err = ctx.service.create_reservation(&ctx_op, nameless).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    assert_eq!(ctx.store.commit_count(), 0);
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Available);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn duplicate_child_ids_are_collapsed(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("4", &["A"]).await;
    let receipt = reserve(&ctx.service, "Ada", &[ids[0], ids[0]])
        .await
        .expect("claim");
    assert_eq!(receipt.child_ids, vec![ids[0]]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sponsor_email_is_normalized(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("5", &["A"]).await;
    let mut request = claim("Ada", &ids, ReservationType::Individual, HoldWindow::selection());
    request.sponsor = sponsor("Ada");
    request.sponsor.email = "  Ada@Example.ORG ".to_string();

    ctx.service
        .create_reservation(&OperationContext::sponsor("ada"), request)
        .await
        .expect("claim");

    let found = ctx
        .service
        .find_by_sponsor_email("ADA@example.org")
        .await
        .expect("lookup");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].reservation.sponsor.email, "ada@example.org");
    assert_eq!(found[0].display_ids(), vec!["5A"]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn store_conflicts_are_retried(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("6", &["A"]).await;
    ctx.store.inject_conflicts(2);

    let receipt = reserve(&ctx.service, "Ada", &ids).await.expect("claim after retries");
    let child = ctx.store.find_child(ids[0]).await.unwrap().unwrap();
    assert!(child.is_held_by(receipt.reservation_id));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn exhausted_retries_surface_storage_failure_and_write_nothing(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("7", &["A"]).await;
    ctx.store.inject_conflicts(100);

    let err = reserve(&ctx.service, "Ada", &ids).await.unwrap_err();

    assert_eq!(err.code(), "storage_failure");
    assert!(ctx.store.reservations().await.is_empty());
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Available);
}

// =============================================================================
// Read
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn reading_past_expiry_reports_expired_without_mutating(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("20", &["A"]).await;
    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada"),
            claim("Ada", &ids, ReservationType::Individual, HoldWindow::hours(1).unwrap()),
        )
        .await
        .expect("claim");

    ctx.advance_hours(2);
    let view = ctx
        .service
        .get_reservation(receipt.token.as_str())
        .await
        .expect("read");

    assert!(view.is_expired);
    assert_eq!(view.reservation.status, ReservationStatus::Selected);
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Selected);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unknown_and_malformed_tokens_are_not_found(ctx: &TestHarness) {
    let well_formed = "a".repeat(64);
    for token in [well_formed.as_str(), "short", ""] {
        let err = ctx.service.get_reservation(token).await.unwrap_err();
        assert!(matches!(err, SponsorshipError::NotFound(_)), "token {:?}", token);
    }
}

// =============================================================================
// Confirm
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn second_confirm_reports_already_confirmed(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("21", &["A"]).await;
    let receipt = reserve(&ctx.service, "Ada", &ids).await.unwrap();
    let op = OperationContext::sponsor("ada@example.org");

    let confirmed = ctx
        .service
        .confirm_reservation(&op, receipt.token.as_str())
        .await
        .expect("first confirm");
    ctx.advance_hours(1);
    let err = ctx
        .service
        .confirm_reservation(&op, receipt.token.as_str())
        .await
        .unwrap_err();

    assert!(matches!(err, SponsorshipError::AlreadyConfirmed));
    let stored = ctx
        .store
        .find_reservation(receipt.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Confirmed);
    assert_eq!(stored.confirmed_at, confirmed.confirmed_at);

    ctx.settle().await;
    assert_eq!(
        ctx.notifier.kinds(),
        vec![SponsorshipEventKind::Created, SponsorshipEventKind::Confirmed]
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn confirm_after_hold_lapses_is_expired_even_before_sweep(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("22", &["A"]).await;
    let receipt = reserve(&ctx.service, "Ada", &ids).await.unwrap();

    ctx.advance_hours(3);
    let err = ctx
        .service
        .confirm_reservation(&OperationContext::sponsor("ada"), receipt.token.as_str())
        .await
        .unwrap_err();

    assert!(matches!(err, SponsorshipError::Expired));
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Selected);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn confirm_at_exact_expiry_instant_still_succeeds(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("23", &["A"]).await;
    let receipt = reserve(&ctx.service, "Ada", &ids).await.unwrap();

    ctx.clock.advance(Duration::hours(2));
    ctx.service
        .confirm_reservation(&OperationContext::sponsor("ada"), receipt.token.as_str())
        .await
        .expect("confirm on the boundary");
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Sponsored);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn confirm_refuses_when_a_child_is_held_elsewhere(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("24", &["A", "B"]).await;
    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada"),
            claim("Ada", &ids[..1], ReservationType::Family, HoldWindow::reservation()),
        )
        .await
        .unwrap();
    assert_eq!(receipt.child_ids, ids);

    // 24B now belongs to someone else's hold
    let other = ReservationId::new();
    ctx.store
        .set_child_status(ids[1], ChildStatus::Selected, Some(other))
        .await;

    let err = ctx
        .service
        .confirm_reservation(&OperationContext::sponsor("ada"), receipt.token.as_str())
        .await
        .unwrap_err();

    match err {
        SponsorshipError::Unavailable { child_ids, display_ids } => {
            assert_eq!(child_ids, vec![ids[1]]);
            assert_eq!(display_ids, vec!["24B"]);
        }
        other => panic!("expected Unavailable, got {:?}", other),
    }

    let stored = ctx
        .store
        .find_reservation(receipt.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Selected);
    assert_eq!(stored.confirmed_at, None);
    let a = ctx.store.find_child(ids[0]).await.unwrap().unwrap();
    assert!(a.is_held_by(receipt.reservation_id));
    let b = ctx.store.find_child(ids[1]).await.unwrap().unwrap();
    assert!(b.is_held_by(other));

    ctx.settle().await;
    assert_eq!(ctx.notifier.kinds(), vec![SponsorshipEventKind::Created]);
}

// =============================================================================
// Cancel
// =============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn cancel_releases_children_and_records_actor(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("30", &["A", "B"]).await;
    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada"),
            claim("Ada", &ids[..1], ReservationType::Sibling, HoldWindow::reservation()),
        )
        .await
        .unwrap();
    assert_eq!(receipt.child_ids.len(), 2);

    let cancelled = ctx
        .service
        .cancel_reservation(
            &OperationContext::sponsor("ada@example.org"),
            receipt.token.as_str(),
            Some("changed plans"),
        )
        .await
        .expect("cancel");

    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("changed plans"));
    assert_eq!(cancelled.cancelled_by.as_deref(), Some("sponsor:ada@example.org"));
    for id in &ids {
        let child = ctx.store.find_child(*id).await.unwrap().unwrap();
        assert_eq!(child.status, ChildStatus::Available);
        assert_eq!(child.reservation_id, None);
    }

    // Released children can be claimed again
    reserve(&ctx.service, "Grace", &ids[..1]).await.expect("reclaim");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn terminal_reservations_report_their_state(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("31", &["A", "B"]).await;
    let op = OperationContext::sponsor("ada");

    let cancelled = reserve(&ctx.service, "Ada", &ids[..1]).await.unwrap();
    ctx.service
        .cancel_reservation(&op, cancelled.token.as_str(), None)
        .await
        .unwrap();
    let err = ctx
        .service
        .cancel_reservation(&op, cancelled.token.as_str(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::AlreadyCancelled));
    let err = ctx
        .service
        .confirm_reservation(&op, cancelled.token.as_str())
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::AlreadyCancelled));

    let confirmed = reserve(&ctx.service, "Ada", &ids[1..]).await.unwrap();
    ctx.service
        .confirm_reservation(&op, confirmed.token.as_str())
        .await
        .unwrap();
    let err = ctx
        .service
        .cancel_reservation(&op, confirmed.token.as_str(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::AlreadyConfirmed));
    assert_eq!(status_of(ctx, ids[1]).await, ChildStatus::Sponsored);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn lapsed_but_unswept_reservation_can_be_cancelled(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("32", &["A"]).await;
    let receipt = reserve(&ctx.service, "Ada", &ids).await.unwrap();
    ctx.advance_hours(5);

    ctx.service
        .cancel_reservation_by_id(
            &OperationContext::admin("dana"),
            receipt.reservation_id,
            Some("cleanup"),
        )
        .await
        .expect("cancel");

    let stored = ctx
        .store
        .find_reservation(receipt.reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Cancelled);
    assert_eq!(stored.cancelled_by.as_deref(), Some("admin:dana"));
    assert_eq!(status_of(ctx, ids[0]).await, ChildStatus::Available);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn notification_failure_does_not_fail_the_claim() {
    let notifier = Arc::new(FailingNotifier::new());
    let ctx = TestHarness::new().with_notifier(notifier.clone());
    let ids = ctx.store.seed_family("40", &["A"]).await;

    let receipt = reserve(&ctx.service, "Ada", &ids).await.expect("claim");
    ctx.settle().await;

    assert_eq!(notifier.attempts(), 1);
    let child = ctx.store.find_child(ids[0]).await.unwrap().unwrap();
    assert!(child.is_held_by(receipt.reservation_id));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn events_carry_committed_children(ctx: &TestHarness) {
    let ids = ctx.store.seed_family("41", &["A", "B"]).await;
    let receipt = ctx
        .service
        .create_reservation(
            &OperationContext::sponsor("ada"),
            claim("Ada", &ids[1..], ReservationType::Family, HoldWindow::reservation()),
        )
        .await
        .unwrap();
    ctx.service
        .cancel_reservation(&OperationContext::sponsor("ada"), receipt.token.as_str(), None)
        .await
        .unwrap();
    ctx.settle().await;

    let events = ctx.notifier.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, SponsorshipEventKind::Created);
    let created: Vec<String> = events[0].children.iter().map(|c| c.display_id()).collect();
    assert_eq!(created, vec!["41B", "41A"]);
    assert!(events[0]
        .children
        .iter()
        .all(|c| c.status == ChildStatus::Selected));

    assert_eq!(events[1].kind, SponsorshipEventKind::Cancelled);
    assert!(events[1]
        .children
        .iter()
        .all(|c| c.status == ChildStatus::Available && c.reservation_id.is_none()));
}
