//! Availability ledger - read side.
//!
//! The ledger itself is the `status` and `reservation_id` columns of each
//! child row. Writes only ever happen inside reservation and import
//! transactions; this service answers the questions the web and admin layers
//! ask about it.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::common::{ChildId, FamilyId, SponsorshipError, SponsorshipResult};
use crate::domains::children::models::{Child, ChildKey, ChildStatus, FamilySummary};
use crate::domains::reservations::models::ReservationStatus;
use crate::kernel::SponsorshipDeps;

/// Program-wide counts for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgramStats {
    pub children_available: i64,
    pub children_selected: i64,
    pub children_sponsored: i64,
    pub children_inactive: i64,
    pub reservations_pending: i64,
    pub reservations_confirmed: i64,
    pub reservations_cancelled: i64,
    pub reservations_expired: i64,
}

impl ProgramStats {
    pub fn total_children(&self) -> i64 {
        self.children_available
            + self.children_selected
            + self.children_sponsored
            + self.children_inactive
    }
}

#[derive(Clone)]
pub struct AvailabilityLedger {
    deps: SponsorshipDeps,
}

impl AvailabilityLedger {
    pub fn new(deps: SponsorshipDeps) -> Self {
        Self { deps }
    }

    pub async fn child(&self, id: ChildId) -> SponsorshipResult<Child> {
        self.deps
            .store
            .find_child(id)
            .await?
            .ok_or_else(|| SponsorshipError::NotFound(format!("child {}", id)))
    }

    pub async fn family_summary(&self, family_id: FamilyId) -> SponsorshipResult<FamilySummary> {
        let family = self
            .deps
            .store
            .find_family(family_id)
            .await?
            .ok_or_else(|| SponsorshipError::NotFound(format!("family {}", family_id)))?;
        let children = self.deps.store.find_family_children(family_id).await?;
        Ok(FamilySummary::from_children(
            family.id,
            &family.family_number,
            &children,
        ))
    }

    /// Families with at least one Available child, by family number.
    pub async fn offerable_families(&self) -> SponsorshipResult<Vec<FamilySummary>> {
        let children = self.deps.store.find_all_children().await?;

        let mut by_family: BTreeMap<(String, FamilyId), Vec<Child>> = BTreeMap::new();
        for child in children {
            by_family
                .entry((child.family_number.clone(), child.family_id))
                .or_default()
                .push(child);
        }

        Ok(by_family
            .into_iter()
            .map(|((number, id), members)| FamilySummary::from_children(id, &number, &members))
            .filter(|summary| summary.available > 0)
            .collect())
    }

    pub async fn program_stats(&self) -> SponsorshipResult<ProgramStats> {
        let mut stats = ProgramStats::default();

        for (status, count) in self.deps.store.child_status_counts().await? {
            match status {
                ChildStatus::Available => stats.children_available = count,
                ChildStatus::Selected => stats.children_selected = count,
                ChildStatus::Sponsored => stats.children_sponsored = count,
                ChildStatus::Inactive => stats.children_inactive = count,
            }
        }
        for (status, count) in self.deps.store.reservation_status_counts().await? {
            match status {
                ReservationStatus::Selected => stats.reservations_pending = count,
                ReservationStatus::Confirmed => stats.reservations_confirmed = count,
                ReservationStatus::Cancelled => stats.reservations_cancelled = count,
                ReservationStatus::Expired => stats.reservations_expired = count,
            }
        }

        Ok(stats)
    }

    /// Whether the child with this roster key is currently held or sponsored.
    pub async fn is_committed(&self, key: &ChildKey) -> SponsorshipResult<bool> {
        Ok(self
            .deps
            .store
            .find_child_by_key(key)
            .await?
            .is_some_and(|c| c.status.is_committed()))
    }
}
