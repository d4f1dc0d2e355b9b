//! Reservation service: create, confirm, cancel and expire claims on children.
//!
//! Every mutating operation is one store transaction:
//!
//! ```text
//! create   lock children (+ seed families) ─► check seeds ─► expand ─► insert + mark Selected
//! confirm  lock reservation ─► lock children ─► check holds ─► CAS Selected→Confirmed ─► children Sponsored
//! cancel   lock reservation ─► lock children ─► CAS Selected→Cancelled ─► children Available
//! expire   lock reservation ─► lock children ─► CAS Selected→Expired   ─► children Available
//! ```
//!
//! Locks are always taken reservation-first, then children in id order.
//! Notifications are dispatched only after commit and never fail an operation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, error, info, instrument, warn};

use crate::common::errors::StoreError;
use crate::common::{
    ChildId, OperationContext, ReservationId, SponsorshipError, SponsorshipResult,
};
use crate::domains::children::models::{Child, ChildStatus};
use crate::domains::reservations::events::{SponsorshipEvent, SponsorshipEventKind};
use crate::domains::reservations::group::{self, SkippedSibling};
use crate::domains::reservations::hold::HoldWindow;
use crate::domains::reservations::models::{
    Reservation, ReservationStatus, ReservationType, ReservationView, SponsorContact,
};
use crate::domains::reservations::reaper::{CleanupReport, ExpirationReaper};
use crate::domains::reservations::token::ReservationToken;
use crate::domains::reservations::validation::{validate_child_ids, validate_sponsor};
use crate::kernel::{SponsorshipDeps, StoreTransaction};

/// Input to [`ReservationService::create_reservation`].
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub sponsor: SponsorContact,
    pub child_ids: Vec<ChildId>,
    pub reservation_type: ReservationType,
    pub hold: HoldWindow,
    pub notes: Option<String>,
}

/// What a sponsor receives after a successful claim.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReservationReceipt {
    pub reservation_id: ReservationId,
    pub token: ReservationToken,
    pub expires_at: DateTime<Utc>,
    pub child_ids: Vec<ChildId>,
    pub display_ids: Vec<String>,
}

/// Totals reported by `cleanup_expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CleanupSummary {
    pub expired_count: usize,
    pub released_child_count: usize,
}

#[derive(Clone)]
pub struct ReservationService {
    deps: SponsorshipDeps,
}

impl ReservationService {
    pub fn new(deps: SponsorshipDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &SponsorshipDeps {
        &self.deps
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Claim `child_ids` (expanded for group types) for a sponsor.
    ///
    /// Fails with `Unavailable` if any requested child is not Available at
    /// claim time; nothing is written in that case.
    #[instrument(
        skip(self, ctx, request),
        fields(request_id = %ctx.request_id, actor = %ctx.actor, reservation_type = %request.reservation_type)
    )]
    pub async fn create_reservation(
        &self,
        ctx: &OperationContext,
        request: NewReservation,
    ) -> SponsorshipResult<ReservationReceipt> {
        let sponsor = validate_sponsor(&request.sponsor)?;
        let child_ids =
            validate_child_ids(&request.child_ids, self.deps.settings.max_children_per_claim)?;
        let claim = Claim {
            sponsor,
            child_ids,
            reservation_type: request.reservation_type,
            hold: request.hold,
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        };

        let claim = &claim;
        let (reservation, children, skipped) = self
            .with_retries("create_reservation", move || self.try_create(claim))
            .await?;

        if !skipped.is_empty() {
            debug!(
                skipped = ?skipped.iter().map(|s| s.display_id.as_str()).collect::<Vec<_>>(),
                "Siblings left out of group claim"
            );
        }

        let display_ids: Vec<String> = children.iter().map(Child::display_id).collect();
        info!(
            reservation_id = %reservation.id,
            token = reservation.token.prefix(),
            children = ?display_ids,
            expires_at = %reservation.expires_at,
            "Reservation created"
        );

        let receipt = ReservationReceipt {
            reservation_id: reservation.id,
            token: reservation.token.clone(),
            expires_at: reservation.expires_at,
            child_ids: reservation.child_ids.clone(),
            display_ids,
        };

        self.dispatch(SponsorshipEvent::new(
            SponsorshipEventKind::Created,
            reservation,
            children,
            self.deps.now(),
        ));

        Ok(receipt)
    }

    async fn try_create(
        &self,
        claim: &Claim,
    ) -> SponsorshipResult<(Reservation, Vec<Child>, Vec<SkippedSibling>)> {
        let now = self.deps.now();

        // Family membership is read unlocked so the lock statement can cover
        // whole families; it is re-checked under the lock below.
        let family_ids = if claim.reservation_type.is_group() {
            let preview = self.deps.store.find_children(&claim.child_ids).await?;
            group::seed_families(&claim.child_ids, &preview)
        } else {
            Vec::new()
        };

        let mut tx = self.deps.store.begin().await?;
        let locked = tx
            .lock_children_for_claim(&claim.child_ids, &family_ids)
            .await?;

        let check = group::check_seeds(&claim.child_ids, &locked);
        if !check.missing.is_empty() {
            let missing: Vec<String> = check.missing.iter().map(|id| id.to_string()).collect();
            return abort(tx, SponsorshipError::NotFound(format!("child {}", missing.join(", "))))
                .await;
        }
        if !check.unavailable.is_empty() {
            let err = SponsorshipError::Unavailable {
                child_ids: check.unavailable.iter().map(|c| c.id).collect(),
                display_ids: check.unavailable.iter().map(|c| c.display_id()).collect(),
            };
            return abort(tx, err).await;
        }

        if claim.reservation_type.is_group()
            && group::seed_families(&claim.child_ids, &locked) != family_ids
        {
            let err = StoreError::Conflict("family membership changed during claim".to_string());
            return abort(tx, err.into()).await;
        }

        let plan = group::expand_claim(&claim.child_ids, &locked, claim.reservation_type);
        debug_assert!(plan
            .child_ids
            .iter()
            .filter_map(|id| locked.iter().find(|c| c.id == *id))
            .all(|c| c.status.can_transition_to(ChildStatus::Selected)));

        let reservation = Reservation::builder()
            .sponsor(claim.sponsor.clone())
            .reservation_type(claim.reservation_type)
            .child_ids(plan.child_ids.clone())
            .selected_at(now)
            .expires_at(claim.hold.expires_at(now))
            .notes(claim.notes.clone())
            .build();

        tx.insert_reservation(&reservation).await?;
        let changed = tx
            .mark_children_selected(&plan.child_ids, reservation.id, now)
            .await?;
        if changed as usize != plan.len() {
            let err = StoreError::Conflict(format!(
                "selected {} of {} children",
                changed,
                plan.len()
            ));
            return abort(tx, err.into()).await;
        }
        tx.commit().await?;

        let children = order_like(
            &plan.child_ids,
            locked
                .into_iter()
                .map(|mut child| {
                    if plan.child_ids.contains(&child.id) {
                        child.status = ChildStatus::Selected;
                        child.reservation_id = Some(reservation.id);
                        child.updated_at = now;
                    }
                    child
                })
                .collect(),
        );

        Ok((reservation, children, plan.skipped))
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Look up a reservation by its token. Never mutates; `is_expired` is
    /// computed against the current time.
    pub async fn get_reservation(&self, token: &str) -> SponsorshipResult<ReservationView> {
        let reservation = self.find_by_token(token).await?;
        let children = self.children_of(&reservation).await?;
        Ok(ReservationView::new(reservation, children, self.deps.now()))
    }

    /// Every reservation a sponsor has made, newest first.
    pub async fn find_by_sponsor_email(&self, email: &str) -> SponsorshipResult<Vec<ReservationView>> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SponsorshipError::validation("email is required"));
        }

        let reservations = self
            .deps
            .store
            .find_reservations_by_sponsor_email(email)
            .await?;

        let all_ids: Vec<ChildId> = reservations
            .iter()
            .flat_map(|r| r.child_ids.iter().copied())
            .collect();
        let by_id: HashMap<ChildId, Child> = self
            .deps
            .store
            .find_children(&all_ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let now = self.deps.now();
        Ok(reservations
            .into_iter()
            .map(|r| {
                let children = r
                    .child_ids
                    .iter()
                    .filter_map(|id| by_id.get(id).cloned())
                    .collect();
                ReservationView::new(r, children, now)
            })
            .collect())
    }

    // =========================================================================
    // Confirm
    // =========================================================================

    /// Selected -> Confirmed; every held child becomes Sponsored.
    ///
    /// A second confirmation reports `AlreadyConfirmed` rather than success.
    /// If any listed child is no longer held by this reservation, nothing is
    /// written and the lost children are reported as `Unavailable`.
    #[instrument(skip(self, ctx, token), fields(request_id = %ctx.request_id, actor = %ctx.actor))]
    pub async fn confirm_reservation(
        &self,
        ctx: &OperationContext,
        token: &str,
    ) -> SponsorshipResult<Reservation> {
        let found = self.find_by_token(token).await?;
        let id = found.id;

        let (reservation, children) = self
            .with_retries("confirm_reservation", move || self.try_confirm(id))
            .await?;

        info!(
            reservation_id = %reservation.id,
            children = ?children.iter().map(Child::display_id).collect::<Vec<_>>(),
            "Reservation confirmed"
        );

        self.dispatch(SponsorshipEvent::new(
            SponsorshipEventKind::Confirmed,
            reservation.clone(),
            children,
            self.deps.now(),
        ));

        Ok(reservation)
    }

    async fn try_confirm(&self, id: ReservationId) -> SponsorshipResult<(Reservation, Vec<Child>)> {
        let now = self.deps.now();
        let mut tx = self.deps.store.begin().await?;

        let locked = tx.lock_reservation(id).await?;
        let Some(mut reservation) = locked else {
            return abort(tx, not_found()).await;
        };
        if let Err(err) = require_selected(&reservation) {
            return abort(tx, err).await;
        }
        if reservation.is_expired_at(now) {
            return abort(tx, SponsorshipError::Expired).await;
        }

        let children = tx.lock_children_for_claim(&reservation.child_ids, &[]).await?;

        let lost = children_not_held(&reservation, &children);
        if !lost.is_empty() {
            warn!(
                reservation_id = %id,
                lost = ?lost.iter().map(|(_, display)| display.as_str()).collect::<Vec<_>>(),
                "Reservation no longer holds all of its children"
            );
            let (child_ids, display_ids) = lost.into_iter().unzip();
            let err = SponsorshipError::Unavailable {
                child_ids,
                display_ids,
            };
            return abort(tx, err).await;
        }

        if !tx.mark_reservation_confirmed(id, now).await? {
            let err = StoreError::Conflict("reservation changed while locked".to_string());
            return abort(tx, err.into()).await;
        }
        let sponsored = tx.mark_children_sponsored(id, now).await?;
        if sponsored as usize != reservation.child_ids.len() {
            let err = StoreError::Conflict(format!(
                "sponsored {} of {} children",
                sponsored,
                reservation.child_ids.len()
            ));
            return abort(tx, err.into()).await;
        }
        tx.commit().await?;

        reservation.status = ReservationStatus::Confirmed;
        reservation.confirmed_at = Some(now);

        let children = settle_children(&reservation, children, ChildStatus::Sponsored, now);
        Ok((reservation, children))
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Selected -> Cancelled; every held child returns to Available.
    #[instrument(skip(self, ctx, token, reason), fields(request_id = %ctx.request_id, actor = %ctx.actor))]
    pub async fn cancel_reservation(
        &self,
        ctx: &OperationContext,
        token: &str,
        reason: Option<&str>,
    ) -> SponsorshipResult<Reservation> {
        let found = self.find_by_token(token).await?;
        self.cancel(ctx, found.id, reason).await
    }

    /// Administrative cancellation by reservation id.
    #[instrument(skip(self, ctx, reason), fields(request_id = %ctx.request_id, actor = %ctx.actor))]
    pub async fn cancel_reservation_by_id(
        &self,
        ctx: &OperationContext,
        id: ReservationId,
        reason: Option<&str>,
    ) -> SponsorshipResult<Reservation> {
        self.cancel(ctx, id, reason).await
    }

    async fn cancel(
        &self,
        ctx: &OperationContext,
        id: ReservationId,
        reason: Option<&str>,
    ) -> SponsorshipResult<Reservation> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let cancelled_by = ctx.actor.to_string();
        let cancelled_by = cancelled_by.as_str();

        let (reservation, children) = self
            .with_retries("cancel_reservation", move || {
                self.try_cancel(id, reason, cancelled_by)
            })
            .await?;

        info!(
            reservation_id = %reservation.id,
            released = children.len(),
            reason = reason.unwrap_or(""),
            "Reservation cancelled"
        );

        self.dispatch(SponsorshipEvent::new(
            SponsorshipEventKind::Cancelled,
            reservation.clone(),
            children,
            self.deps.now(),
        ));

        Ok(reservation)
    }

    async fn try_cancel(
        &self,
        id: ReservationId,
        reason: Option<&str>,
        cancelled_by: &str,
    ) -> SponsorshipResult<(Reservation, Vec<Child>)> {
        let now = self.deps.now();
        let mut tx = self.deps.store.begin().await?;

        let locked = tx.lock_reservation(id).await?;
        let Some(mut reservation) = locked else {
            return abort(tx, not_found()).await;
        };
        if let Err(err) = require_selected(&reservation) {
            return abort(tx, err).await;
        }

        let children = tx.lock_children_for_claim(&reservation.child_ids, &[]).await?;

        if !tx
            .mark_reservation_cancelled(id, now, reason, cancelled_by)
            .await?
        {
            let err = StoreError::Conflict("reservation changed while locked".to_string());
            return abort(tx, err.into()).await;
        }
        tx.release_children(id, now).await?;
        tx.commit().await?;

        reservation.status = ReservationStatus::Cancelled;
        reservation.cancelled_at = Some(now);
        reservation.cancel_reason = reason.map(str::to_string);
        reservation.cancelled_by = Some(cancelled_by.to_string());

        let children = settle_children(&reservation, children, ChildStatus::Available, now);
        Ok((reservation, children))
    }

    // =========================================================================
    // Expire
    // =========================================================================

    /// Release every reservation whose hold window has passed.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, actor = %ctx.actor))]
    pub async fn cleanup_expired(&self, ctx: &OperationContext) -> SponsorshipResult<CleanupSummary> {
        let report: CleanupReport = ExpirationReaper::new(self.clone()).sweep().await?;
        Ok(CleanupSummary {
            expired_count: report.expired_count,
            released_child_count: report.released_child_count,
        })
    }

    /// Expire a single reservation if it is still Selected and past its
    /// window. Returns the number of children released, or `None` if the
    /// reservation was no longer eligible (confirmed, cancelled or already
    /// expired by a concurrent sweep).
    pub async fn expire_reservation(&self, id: ReservationId) -> SponsorshipResult<Option<usize>> {
        self.with_retries("expire_reservation", move || self.try_expire(id))
            .await
    }

    async fn try_expire(&self, id: ReservationId) -> SponsorshipResult<Option<usize>> {
        let now = self.deps.now();
        let mut tx = self.deps.store.begin().await?;

        let eligible = match tx.lock_reservation(id).await? {
            Some(r) => r.status == ReservationStatus::Selected && r.is_expired_at(now),
            None => false,
        };
        if !eligible {
            tx.rollback().await?;
            return Ok(None);
        }

        if !tx.mark_reservation_expired(id, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        let released = tx.release_children(id, now).await?;
        tx.commit().await?;

        info!(reservation_id = %id, released, "Reservation expired");
        Ok(Some(released as usize))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn find_by_token(&self, raw: &str) -> SponsorshipResult<Reservation> {
        let token = ReservationToken::parse(raw).ok_or_else(not_found)?;
        self.deps
            .store
            .find_reservation_by_token(&token)
            .await?
            .ok_or_else(not_found)
    }

    async fn children_of(&self, reservation: &Reservation) -> SponsorshipResult<Vec<Child>> {
        let children = self.deps.store.find_children(&reservation.child_ids).await?;
        Ok(order_like(&reservation.child_ids, children))
    }

    /// Run one transactional attempt, retrying store conflicts.
    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> SponsorshipResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SponsorshipResult<T>>,
    {
        let max_retries = self.deps.settings.max_store_retries;
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(SponsorshipError::StorageFailure(err))
                    if err.is_retryable() && retries < max_retries =>
                {
                    retries += 1;
                    warn!(operation, retries, error = %err, "Store conflict, retrying");
                }
                Err(SponsorshipError::StorageFailure(err)) => {
                    error!(operation, retries, error = %err, "Storage failure");
                    return Err(SponsorshipError::StorageFailure(err));
                }
                other => return other,
            }
        }
    }

    /// Fire-and-forget delivery of a committed event.
    fn dispatch(&self, event: SponsorshipEvent) {
        let notifier = self.deps.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(
                    error = %e,
                    kind = ?event.kind,
                    reservation_id = %event.reservation.id,
                    "Notification delivery failed"
                );
            }
        });
    }
}

/// Validated claim, as used inside the transaction.
struct Claim {
    sponsor: SponsorContact,
    child_ids: Vec<ChildId>,
    reservation_type: ReservationType,
    hold: HoldWindow,
    notes: Option<String>,
}

fn not_found() -> SponsorshipError {
    SponsorshipError::NotFound("reservation".to_string())
}

/// Map a non-Selected status to the error a transition reports.
fn require_selected(reservation: &Reservation) -> SponsorshipResult<()> {
    match reservation.status {
        ReservationStatus::Selected => Ok(()),
        ReservationStatus::Confirmed => Err(SponsorshipError::AlreadyConfirmed),
        ReservationStatus::Cancelled => Err(SponsorshipError::AlreadyCancelled),
        ReservationStatus::Expired => Err(SponsorshipError::Expired),
    }
}

/// Children the reservation lists but no longer holds, with display ids.
/// A child missing from `locked` was deleted and is shown by its id.
fn children_not_held(reservation: &Reservation, locked: &[Child]) -> Vec<(ChildId, String)> {
    reservation
        .child_ids
        .iter()
        .filter_map(|id| match locked.iter().find(|c| c.id == *id) {
            Some(child) if child.is_held_by(reservation.id) => None,
            Some(child) => Some((*id, child.display_id())),
            None => Some((*id, id.to_string())),
        })
        .collect()
}

async fn abort<T>(tx: Box<dyn StoreTransaction>, err: SponsorshipError) -> SponsorshipResult<T> {
    tx.rollback().await?;
    Err(err)
}

/// Apply a committed transition to locked child rows for the outgoing event.
fn settle_children(
    reservation: &Reservation,
    children: Vec<Child>,
    status: ChildStatus,
    now: DateTime<Utc>,
) -> Vec<Child> {
    let settled = children
        .into_iter()
        .map(|mut child| {
            if child.is_held_by(reservation.id) {
                child.status = status;
                if status == ChildStatus::Available {
                    child.reservation_id = None;
                }
                child.updated_at = now;
            }
            child
        })
        .collect();
    order_like(&reservation.child_ids, settled)
}

/// Order `children` by their position in `ids`.
fn order_like(ids: &[ChildId], mut children: Vec<Child>) -> Vec<Child> {
    children.sort_by_key(|c| ids.iter().position(|id| *id == c.id).unwrap_or(usize::MAX));
    children
}
