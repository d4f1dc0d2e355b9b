//! PostgreSQL-backed store.
//!
//! Thin adapter: every statement lives on the models, this file only routes
//! trait calls to them with the right executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::{ChildId, FamilyId, ReservationId};
use crate::config::Config;
use crate::domains::children::models::{Child, ChildKey, ChildProfile, ChildStatus, Family};
use crate::domains::reservations::models::{Reservation, ReservationStatus};
use crate::domains::reservations::token::ReservationToken;
use crate::kernel::{BaseSponsorshipStore, StoreResult, StoreTransaction};

#[derive(Clone)]
pub struct PgSponsorshipStore {
    pool: PgPool,
}

impl PgSponsorshipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the configured URL and pool size, then run migrations.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseSponsorshipStore for PgSponsorshipStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn find_child(&self, id: ChildId) -> StoreResult<Option<Child>> {
        Ok(Child::find_by_id(id, &self.pool).await?)
    }

    async fn find_children(&self, ids: &[ChildId]) -> StoreResult<Vec<Child>> {
        Ok(Child::find_by_ids(ids, &self.pool).await?)
    }

    async fn find_child_by_key(&self, key: &ChildKey) -> StoreResult<Option<Child>> {
        Ok(Child::find_by_key(key, &self.pool).await?)
    }

    async fn find_family_children(&self, family_id: FamilyId) -> StoreResult<Vec<Child>> {
        Ok(Child::find_by_family(family_id, &self.pool).await?)
    }

    async fn find_all_children(&self) -> StoreResult<Vec<Child>> {
        Ok(Child::find_all(&self.pool).await?)
    }

    async fn find_family(&self, id: FamilyId) -> StoreResult<Option<Family>> {
        Ok(Family::find_by_id(id, &self.pool).await?)
    }

    async fn find_families(&self) -> StoreResult<Vec<Family>> {
        Ok(Family::find_all(&self.pool).await?)
    }

    async fn find_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(Reservation::find_by_id(id, &self.pool).await?)
    }

    async fn find_reservation_by_token(
        &self,
        token: &ReservationToken,
    ) -> StoreResult<Option<Reservation>> {
        Ok(Reservation::find_by_token(token, &self.pool).await?)
    }

    async fn find_reservations_by_sponsor_email(
        &self,
        email: &str,
    ) -> StoreResult<Vec<Reservation>> {
        Ok(Reservation::find_by_sponsor_email(email, &self.pool).await?)
    }

    async fn find_expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ReservationId>> {
        Ok(Reservation::find_expired_ids(now, limit, &self.pool).await?)
    }

    async fn child_status_counts(&self) -> StoreResult<Vec<(ChildStatus, i64)>> {
        Ok(Child::count_by_status(&self.pool).await?)
    }

    async fn reservation_status_counts(&self) -> StoreResult<Vec<(ReservationStatus, i64)>> {
        Ok(Reservation::count_by_status(&self.pool).await?)
    }
}

/// Read-committed transaction; row locks come from `FOR UPDATE` in the models.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_children_for_claim(
        &mut self,
        ids: &[ChildId],
        family_ids: &[FamilyId],
    ) -> StoreResult<Vec<Child>> {
        Ok(Child::lock_for_claim(ids, family_ids, &mut *self.tx).await?)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        Ok(reservation.insert(&mut *self.tx).await?)
    }

    async fn mark_children_selected(
        &mut self,
        ids: &[ChildId],
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(Child::mark_selected(ids, reservation_id, now, &mut *self.tx).await?)
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(Reservation::lock_by_id(id, &mut *self.tx).await?)
    }

    async fn mark_reservation_confirmed(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(Reservation::mark_confirmed(id, now, &mut *self.tx).await?)
    }

    async fn mark_reservation_cancelled(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
        reason: Option<&str>,
        cancelled_by: &str,
    ) -> StoreResult<bool> {
        Ok(Reservation::mark_cancelled(id, now, reason, cancelled_by, &mut *self.tx).await?)
    }

    async fn mark_reservation_expired(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(Reservation::mark_expired(id, now, &mut *self.tx).await?)
    }

    async fn mark_children_sponsored(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(Child::mark_sponsored(reservation_id, now, &mut *self.tx).await?)
    }

    async fn release_children(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(Child::release(reservation_id, now, &mut *self.tx).await?)
    }

    async fn upsert_family(&mut self, family_number: &str) -> StoreResult<FamilyId> {
        Ok(Family::upsert_by_number(family_number, &mut *self.tx).await?.id)
    }

    async fn delete_all_children(&mut self) -> StoreResult<u64> {
        Ok(Child::delete_all(&mut *self.tx).await?)
    }

    async fn upsert_child(
        &mut self,
        id: Option<ChildId>,
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
    ) -> StoreResult<ChildId> {
        match id {
            Some(id) => {
                let id = Child::upsert_with_id(id, family_id, letter, profile, &mut *self.tx).await?;
                Child::sync_id_sequence(&mut *self.tx).await?;
                Ok(id)
            }
            None => Ok(Child::upsert_by_key(family_id, letter, profile, &mut *self.tx).await?),
        }
    }

    async fn set_child_ledger(
        &mut self,
        id: ChildId,
        status: ChildStatus,
        reservation_id: Option<ReservationId>,
    ) -> StoreResult<()> {
        Ok(Child::set_ledger(id, status, reservation_id, &mut *self.tx).await?)
    }

    async fn delete_empty_families(&mut self) -> StoreResult<u64> {
        Ok(Family::delete_empty(&mut *self.tx).await?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.rollback().await?)
    }
}
