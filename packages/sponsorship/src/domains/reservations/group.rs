//! Group coordinator: which children a claim covers.
//!
//! Everything here is a pure function of a ledger snapshot. The reservation
//! service takes the snapshot under row locks, asks for a plan, and performs
//! the writes itself, so the critical section contains no decision logic that
//! could observe a different state than the one it writes against.

use std::collections::HashSet;

use crate::common::{ChildId, FamilyId};
use crate::domains::children::models::{Child, ChildStatus};
use crate::domains::reservations::models::ReservationType;

/// A sibling left out of a group claim because it was not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSibling {
    pub child_id: ChildId,
    pub display_id: String,
    pub status: ChildStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPlan {
    /// Seeds in request order, then siblings by family and letter.
    pub child_ids: Vec<ChildId>,
    pub skipped: Vec<SkippedSibling>,
}

impl ClaimPlan {
    pub fn len(&self) -> usize {
        self.child_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_ids.is_empty()
    }
}

/// Seed validation result.
#[derive(Debug, Default)]
pub struct SeedCheck<'a> {
    /// Ids that do not exist in the snapshot.
    pub missing: Vec<ChildId>,
    /// Seeds present but not Available.
    pub unavailable: Vec<&'a Child>,
}

impl SeedCheck<'_> {
    pub fn is_clear(&self) -> bool {
        self.missing.is_empty() && self.unavailable.is_empty()
    }
}

/// Check that every seed exists and is Available.
pub fn check_seeds<'a>(seeds: &[ChildId], snapshot: &'a [Child]) -> SeedCheck<'a> {
    let mut check = SeedCheck::default();
    for seed in seeds {
        match snapshot.iter().find(|c| c.id == *seed) {
            Some(child) if child.is_available() => {}
            Some(child) => check.unavailable.push(child),
            None => check.missing.push(*seed),
        }
    }
    check
}

/// Families of the seeds, in order of first appearance.
pub fn seed_families(seeds: &[ChildId], snapshot: &[Child]) -> Vec<FamilyId> {
    let mut seen = HashSet::new();
    seeds
        .iter()
        .filter_map(|seed| snapshot.iter().find(|c| c.id == *seed))
        .map(|c| c.family_id)
        .filter(|family_id| seen.insert(*family_id))
        .collect()
}

/// Compute the full set of children a claim covers.
///
/// Seeds must already have passed [`check_seeds`]. For Sibling and Family
/// claims every other Available child of each seed's family is added; any
/// sibling that is Selected, Sponsored or Inactive is reported in `skipped`
/// and left alone.
pub fn expand_claim(
    seeds: &[ChildId],
    snapshot: &[Child],
    reservation_type: ReservationType,
) -> ClaimPlan {
    let mut child_ids: Vec<ChildId> = Vec::with_capacity(seeds.len());
    let mut included: HashSet<ChildId> = HashSet::new();
    for seed in seeds {
        if included.insert(*seed) {
            child_ids.push(*seed);
        }
    }

    let mut skipped = Vec::new();
    match reservation_type {
        ReservationType::Individual => {}
        ReservationType::Sibling | ReservationType::Family => {
            for family_id in seed_families(seeds, snapshot) {
                let mut siblings: Vec<&Child> = snapshot
                    .iter()
                    .filter(|c| c.family_id == family_id && !included.contains(&c.id))
                    .collect();
                siblings.sort_by(|a, b| a.letter.cmp(&b.letter));

                for sibling in siblings {
                    if sibling.is_available() {
                        included.insert(sibling.id);
                        child_ids.push(sibling.id);
                    } else {
                        skipped.push(SkippedSibling {
                            child_id: sibling.id,
                            display_id: sibling.display_id(),
                            status: sibling.status,
                        });
                    }
                }
            }
        }
    }

    ClaimPlan { child_ids, skipped }
}
