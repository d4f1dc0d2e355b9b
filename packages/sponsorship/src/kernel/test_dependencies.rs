// TestDependencies - in-memory implementations for testing
//
// MemoryStore gives the same transactional guarantees as the Postgres store
// by serializing transactions: `begin` takes the state lock and works on a
// copy, `commit` writes the copy back, dropping the transaction discards it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{
    BaseClock, BaseNotifier, BaseSponsorshipStore, SponsorshipDeps, StoreResult, StoreTransaction,
};
use crate::common::errors::StoreError;
use crate::common::{ChildId, FamilyId, ReservationId};
use crate::domains::children::models::{Child, ChildKey, ChildProfile, ChildStatus, Family};
use crate::domains::reservations::events::{SponsorshipEvent, SponsorshipEventKind};
use crate::domains::reservations::models::{Reservation, ReservationStatus};
use crate::domains::reservations::token::ReservationToken;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    families: BTreeMap<FamilyId, Family>,
    children: BTreeMap<ChildId, Child>,
    reservations: BTreeMap<ReservationId, Reservation>,
    next_family_id: i64,
    next_child_id: i64,
}

impl MemoryState {
    fn family_number(&self, family_id: FamilyId) -> StoreResult<String> {
        self.families
            .get(&family_id)
            .map(|f| f.family_number.clone())
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("no family {}", family_id)))
    }

    fn upsert_family(&mut self, family_number: &str) -> FamilyId {
        if let Some(family) = self
            .families
            .values()
            .find(|f| f.family_number == family_number)
        {
            return family.id;
        }
        self.next_family_id += 1;
        let id = FamilyId::new(self.next_family_id);
        self.families.insert(
            id,
            Family {
                id,
                family_number: family_number.to_string(),
                notes: None,
                created_at: Utc::now(),
            },
        );
        id
    }

    fn put_child(
        &mut self,
        id: ChildId,
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
    ) -> StoreResult<ChildId> {
        let family_number = self.family_number(family_id)?;
        if self
            .children
            .values()
            .any(|c| c.id != id && c.family_id == family_id && c.letter == letter)
        {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "duplicate child {}{}",
                family_number,
                letter
            )));
        }

        let (status, reservation_id) = self
            .children
            .get(&id)
            .map(|c| (c.status, c.reservation_id))
            .unwrap_or((ChildStatus::Available, None));

        self.children.insert(
            id,
            Child {
                id,
                family_id,
                family_number,
                letter: letter.to_string(),
                profile: profile.clone(),
                status,
                reservation_id,
                updated_at: Utc::now(),
            },
        );
        self.next_child_id = self.next_child_id.max(id.get());
        Ok(id)
    }
}

/// In-memory [`BaseSponsorshipStore`] with failure injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    conflicts_to_inject: Arc<AtomicUsize>,
    failing_expiry: Arc<Mutex<HashSet<ReservationId>>>,
    commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or find) a family by number.
    pub async fn add_family(&self, family_number: &str) -> FamilyId {
        self.state.lock().await.upsert_family(family_number)
    }

    /// Add an Available child with the given profile.
    pub async fn add_child(
        &self,
        family_id: FamilyId,
        letter: &str,
        profile: ChildProfile,
    ) -> StoreResult<ChildId> {
        let mut state = self.state.lock().await;
        let id = ChildId::new(state.next_child_id + 1);
        state.put_child(id, family_id, letter, &profile)
    }

    /// Seed a family with one Available child per letter.
    pub async fn seed_family(&self, family_number: &str, letters: &[&str]) -> Vec<ChildId> {
        let family_id = self.add_family(family_number).await;
        let mut ids = Vec::with_capacity(letters.len());
        for letter in letters {
            let profile = ChildProfile {
                name: Some(format!("Child {}{}", family_number, letter)),
                ..Default::default()
            };
            if let Ok(id) = self.add_child(family_id, letter, profile).await {
                ids.push(id);
            }
        }
        ids
    }

    /// Force a child's ledger entry, bypassing the transition rules.
    pub async fn set_child_status(
        &self,
        id: ChildId,
        status: ChildStatus,
        reservation_id: Option<ReservationId>,
    ) {
        if let Some(child) = self.state.lock().await.children.get_mut(&id) {
            child.status = status;
            child.reservation_id = reservation_id;
        }
    }

    /// The next `count` commits fail with a retryable conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    /// Expiring this reservation fails with a non-retryable error.
    pub fn fail_expiry_of(&self, id: ReservationId) {
        lock(&self.failing_expiry).insert(id);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn children_with_status(&self, status: ChildStatus) -> Vec<Child> {
        self.state
            .lock()
            .await
            .children
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect()
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }
}

#[async_trait]
impl BaseSponsorshipStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            conflicts_to_inject: self.conflicts_to_inject.clone(),
            failing_expiry: self.failing_expiry.clone(),
            commits: self.commits.clone(),
        }))
    }

    async fn find_child(&self, id: ChildId) -> StoreResult<Option<Child>> {
        Ok(self.state.lock().await.children.get(&id).cloned())
    }

    async fn find_children(&self, ids: &[ChildId]) -> StoreResult<Vec<Child>> {
        let state = self.state.lock().await;
        Ok(state
            .children
            .values()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn find_child_by_key(&self, key: &ChildKey) -> StoreResult<Option<Child>> {
        let state = self.state.lock().await;
        Ok(state.children.values().find(|c| &c.key() == key).cloned())
    }

    async fn find_family_children(&self, family_id: FamilyId) -> StoreResult<Vec<Child>> {
        let state = self.state.lock().await;
        let mut children: Vec<Child> = state
            .children
            .values()
            .filter(|c| c.family_id == family_id)
            .cloned()
            .collect();
        children.sort_by(|a, b| a.letter.cmp(&b.letter));
        Ok(children)
    }

    async fn find_all_children(&self) -> StoreResult<Vec<Child>> {
        let state = self.state.lock().await;
        let mut children: Vec<Child> = state.children.values().cloned().collect();
        children.sort_by(|a, b| {
            (&a.family_number, &a.letter).cmp(&(&b.family_number, &b.letter))
        });
        Ok(children)
    }

    async fn find_family(&self, id: FamilyId) -> StoreResult<Option<Family>> {
        Ok(self.state.lock().await.families.get(&id).cloned())
    }

    async fn find_families(&self) -> StoreResult<Vec<Family>> {
        let state = self.state.lock().await;
        let mut families: Vec<Family> = state.families.values().cloned().collect();
        families.sort_by(|a, b| a.family_number.cmp(&b.family_number));
        Ok(families)
    }

    async fn find_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn find_reservation_by_token(
        &self,
        token: &ReservationToken,
    ) -> StoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .values()
            .find(|r| &r.token == token)
            .cloned())
    }

    async fn find_reservations_by_sponsor_email(
        &self,
        email: &str,
    ) -> StoreResult<Vec<Reservation>> {
        let email = email.to_lowercase();
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.sponsor.email.to_lowercase() == email)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.selected_at.cmp(&a.selected_at));
        Ok(found)
    }

    async fn find_expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ReservationId>> {
        let state = self.state.lock().await;
        let mut expired: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Selected && r.expires_at < now)
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|r| r.id)
            .collect())
    }

    async fn child_status_counts(&self) -> StoreResult<Vec<(ChildStatus, i64)>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<ChildStatus, i64> = HashMap::new();
        for child in state.children.values() {
            *counts.entry(child.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn reservation_status_counts(&self) -> StoreResult<Vec<(ReservationStatus, i64)>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<ReservationStatus, i64> = HashMap::new();
        for reservation in state.reservations.values() {
            *counts.entry(reservation.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    conflicts_to_inject: Arc<AtomicUsize>,
    failing_expiry: Arc<Mutex<HashSet<ReservationId>>>,
    commits: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn held_by(&mut self, reservation_id: ReservationId) -> impl Iterator<Item = &mut Child> {
        self.working
            .children
            .values_mut()
            .filter(move |c| c.is_held_by(reservation_id))
    }

    /// Apply `update` to a Selected reservation when `precondition` holds.
    fn transition(
        &mut self,
        id: ReservationId,
        precondition: impl FnOnce(&Reservation) -> bool,
        update: impl FnOnce(&mut Reservation),
    ) -> bool {
        match self.working.reservations.get_mut(&id) {
            Some(r) if r.status == ReservationStatus::Selected && precondition(r) => {
                update(r);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_children_for_claim(
        &mut self,
        ids: &[ChildId],
        family_ids: &[FamilyId],
    ) -> StoreResult<Vec<Child>> {
        Ok(self
            .working
            .children
            .values()
            .filter(|c| ids.contains(&c.id) || family_ids.contains(&c.family_id))
            .cloned()
            .collect())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        if self
            .working
            .reservations
            .values()
            .any(|r| r.id == reservation.id || r.token == reservation.token)
        {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "duplicate reservation id or token"
            )));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn mark_children_selected(
        &mut self,
        ids: &[ChildId],
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut changed = 0;
        for child in self.working.children.values_mut() {
            if ids.contains(&child.id) && child.status == ChildStatus::Available {
                child.status = ChildStatus::Selected;
                child.reservation_id = Some(reservation_id);
                child.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn mark_reservation_confirmed(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.transition(
            id,
            |r| r.expires_at >= now,
            |r| {
                r.status = ReservationStatus::Confirmed;
                r.confirmed_at = Some(now);
            },
        ))
    }

    async fn mark_reservation_cancelled(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
        reason: Option<&str>,
        cancelled_by: &str,
    ) -> StoreResult<bool> {
        Ok(self.transition(
            id,
            |_| true,
            |r| {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(now);
                r.cancel_reason = reason.map(str::to_string);
                r.cancelled_by = Some(cancelled_by.to_string());
            },
        ))
    }

    async fn mark_reservation_expired(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if lock(&self.failing_expiry).contains(&id) {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "injected failure expiring {}",
                id
            )));
        }
        Ok(self.transition(
            id,
            |r| r.expires_at < now,
            |r| {
                r.status = ReservationStatus::Expired;
                r.expired_at = Some(now);
            },
        ))
    }

    async fn mark_children_sponsored(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut changed = 0;
        for child in self.held_by(reservation_id) {
            child.status = ChildStatus::Sponsored;
            child.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn release_children(
        &mut self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut changed = 0;
        for child in self.held_by(reservation_id) {
            child.status = ChildStatus::Available;
            child.reservation_id = None;
            child.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn upsert_family(&mut self, family_number: &str) -> StoreResult<FamilyId> {
        Ok(self.working.upsert_family(family_number))
    }

    async fn delete_all_children(&mut self) -> StoreResult<u64> {
        let count = self.working.children.len() as u64;
        self.working.children.clear();
        Ok(count)
    }

    async fn upsert_child(
        &mut self,
        id: Option<ChildId>,
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
    ) -> StoreResult<ChildId> {
        let id = match id {
            Some(id) => id,
            None => self
                .working
                .children
                .values()
                .find(|c| c.family_id == family_id && c.letter == letter)
                .map(|c| c.id)
                .unwrap_or_else(|| ChildId::new(self.working.next_child_id + 1)),
        };
        self.working.put_child(id, family_id, letter, profile)
    }

    async fn set_child_ledger(
        &mut self,
        id: ChildId,
        status: ChildStatus,
        reservation_id: Option<ReservationId>,
    ) -> StoreResult<()> {
        if let Some(child) = self.working.children.get_mut(&id) {
            child.status = status;
            child.reservation_id = reservation_id;
            child.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_empty_families(&mut self) -> StoreResult<u64> {
        let occupied: HashSet<FamilyId> =
            self.working.children.values().map(|c| c.family_id).collect();
        let before = self.working.families.len();
        self.working.families.retain(|id, _| occupied.contains(id));
        Ok((before - self.working.families.len()) as u64)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let injected = self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// Notifiers
// =============================================================================

/// Records every event it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SponsorshipEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SponsorshipEvent> {
        lock(&self.events).clone()
    }

    pub fn kinds(&self) -> Vec<SponsorshipEventKind> {
        lock(&self.events).iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl BaseNotifier for RecordingNotifier {
    async fn notify(&self, event: &SponsorshipEvent) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Fails every delivery and counts the attempts.
#[derive(Default)]
pub struct FailingNotifier {
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseNotifier for FailingNotifier {
    async fn notify(&self, _event: &SponsorshipEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("mail relay unavailable")
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl BaseClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            clock: Arc::new(ManualClock::new(Utc::now())),
        }
    }

    /// Wire the fakes into a service dependency container.
    pub fn into_deps(self) -> SponsorshipDeps {
        SponsorshipDeps::new(self.store)
            .with_notifier(self.notifier)
            .with_clock(self.clock)
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
