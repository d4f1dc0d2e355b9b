// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Claim validation, group expansion and release rules live in the domain
// services, which drive these traits inside a single transaction.
//
// Naming convention: Base* for trait names (e.g., BaseSponsorshipStore, BaseNotifier)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::errors::StoreError;
use crate::common::{ChildId, FamilyId, ReservationId};
use crate::domains::children::models::{Child, ChildKey, ChildProfile, ChildStatus, Family};
use crate::domains::reservations::events::SponsorshipEvent;
use crate::domains::reservations::models::{Reservation, ReservationStatus};
use crate::domains::reservations::token::ReservationToken;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Store Trait (Infrastructure - transactional persistence)
// =============================================================================

/// Entry point to the entity store.
///
/// Read methods run outside any transaction and may observe state that a
/// concurrent transaction is about to change; every decision that leads to a
/// write must be re-checked through a [`StoreTransaction`].
#[async_trait]
pub trait BaseSponsorshipStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn find_child(&self, id: ChildId) -> StoreResult<Option<Child>>;

    async fn find_children(&self, ids: &[ChildId]) -> StoreResult<Vec<Child>>;

    async fn find_child_by_key(&self, key: &ChildKey) -> StoreResult<Option<Child>>;

    async fn find_family_children(&self, family_id: FamilyId) -> StoreResult<Vec<Child>>;

    async fn find_all_children(&self) -> StoreResult<Vec<Child>>;

    async fn find_family(&self, id: FamilyId) -> StoreResult<Option<Family>>;

    async fn find_families(&self) -> StoreResult<Vec<Family>>;

    async fn find_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>>;

    async fn find_reservation_by_token(
        &self,
        token: &ReservationToken,
    ) -> StoreResult<Option<Reservation>>;

    /// Case-insensitive match on the sponsor's email, newest first.
    async fn find_reservations_by_sponsor_email(&self, email: &str)
        -> StoreResult<Vec<Reservation>>;

    /// Pending reservations whose `expires_at` is strictly before `now`.
    async fn find_expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ReservationId>>;

    async fn child_status_counts(&self) -> StoreResult<Vec<(ChildStatus, i64)>>;

    async fn reservation_status_counts(&self) -> StoreResult<Vec<(ReservationStatus, i64)>>;
}

/// A unit of work against the store.
///
/// Implementations must give the guarantees a read-committed transaction with
/// row locks gives: rows returned by the `lock_*` methods cannot be changed
/// by anyone else until this transaction ends, and the `mark_*` methods are
/// compare-and-swap writes that report whether their precondition held.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock the given children and every child of the given families.
    async fn lock_children_for_claim(
        &mut self,
        ids: &[ChildId],
        family_ids: &[FamilyId],
    ) -> StoreResult<Vec<Child>>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()>;

    /// Available -> Selected; returns how many rows actually changed.
    async fn mark_children_selected(
        &mut self,
        ids: &[ChildId],
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn lock_reservation(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>>;

    /// CAS Selected -> Confirmed, requires `expires_at >= now`.
    async fn mark_reservation_confirmed(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// CAS Selected -> Cancelled.
    async fn mark_reservation_cancelled(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
        reason: Option<&str>,
        cancelled_by: &str,
    ) -> StoreResult<bool>;

    /// CAS Selected -> Expired, requires `expires_at < now`.
    async fn mark_reservation_expired(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Selected -> Sponsored for children held by the reservation.
    async fn mark_children_sponsored(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Selected -> Available for children held by the reservation; clears the reference.
    async fn release_children(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    // Roster maintenance (import)

    async fn upsert_family(&mut self, family_number: &str) -> StoreResult<FamilyId>;

    async fn delete_all_children(&mut self) -> StoreResult<u64>;

    /// Write a child's profile. With `id` the row keeps that id (re-inserted
    /// if it was deleted); without, the row is matched by (family, letter) or
    /// created as Available.
    async fn upsert_child(
        &mut self,
        id: Option<ChildId>,
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
    ) -> StoreResult<ChildId>;

    /// Overwrite a child's ledger entry. Only the import path uses this.
    async fn set_child_ledger(
        &mut self,
        id: ChildId,
        status: ChildStatus,
        reservation_id: Option<ReservationId>,
    ) -> StoreResult<()>;

    async fn delete_empty_families(&mut self) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

// =============================================================================
// Notification Trait (Infrastructure - sponsor/admin messaging)
// =============================================================================

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Deliver an event. Called after commit; failures never affect the operation.
    async fn notify(&self, event: &SponsorshipEvent) -> Result<()>;
}

// =============================================================================
// Clock Trait (Infrastructure - time source)
// =============================================================================

pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
