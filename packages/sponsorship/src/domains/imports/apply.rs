//! Applying a roster while keeping every child's place in the ledger.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, instrument, warn};

use super::analyzer::{analyze_import, index_roster, ImportAnalysis};
use super::roster::{RosterEntry, RosterSource};
use crate::common::errors::StoreError;
use crate::common::{
    FamilyId, OperationContext, ReservationId, SponsorshipError, SponsorshipResult,
};
use crate::domains::children::models::{Child, ChildKey, ChildProfile, ChildStatus};
use crate::kernel::SponsorshipDeps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportOptions {
    /// Re-apply each surviving child's status and reservation reference.
    pub preserve_status: bool,
    /// Delete children that are missing from the roster.
    pub remove_missing: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            preserve_status: true,
            remove_missing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub analysis: ImportAnalysis,
    /// Children whose non-Available status was carried over.
    pub restored: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Pending reservations cancelled because a child they held was reset
    /// or removed.
    pub cancelled_reservations: Vec<ReservationId>,
}

/// Recorded as the cancel reason on holds an import voids.
pub const IMPORT_CANCEL_REASON: &str = "roster import";

/// Loads rosters and reconciles them with the stored children.
///
/// Imports must not run alongside live claims; callers serialize them
/// (the admin CLI is the only entry point).
#[derive(Clone)]
pub struct ImportReconciler {
    deps: SponsorshipDeps,
}

impl ImportReconciler {
    pub fn new(deps: SponsorshipDeps) -> Self {
        Self { deps }
    }

    /// Report what applying `source` would change.
    pub async fn analyze(&self, source: &dyn RosterSource) -> SponsorshipResult<ImportAnalysis> {
        let roster = load_roster(source).await?;
        let current = self.deps.store.find_all_children().await?;
        Ok(analyze_import(&current, &roster))
    }

    /// Write `source` into the store in one transaction.
    #[instrument(skip(self, ctx, source), fields(request_id = %ctx.request_id, actor = %ctx.actor))]
    pub async fn apply_with_preservation(
        &self,
        ctx: &OperationContext,
        source: &dyn RosterSource,
        options: ImportOptions,
    ) -> SponsorshipResult<ImportReport> {
        let roster = load_roster(source).await?;

        // Snapshot before any write; it is the only record of who held what
        // once rows are deleted.
        let snapshot = self.deps.store.find_all_children().await?;
        let analysis = analyze_import(&snapshot, &roster);
        let previous: HashMap<ChildKey, &Child> = snapshot.iter().map(|c| (c.key(), c)).collect();
        let (incoming, _) = index_roster(&roster);
        let voided = voided_reservations(&snapshot, &incoming, options);

        let now = self.deps.now();
        let cancelled_by = ctx.actor.to_string();
        let mut tx = self.deps.store.begin().await?;

        // A hold is all-or-nothing: once one of its children loses its place
        // the whole reservation is cancelled and its other children released.
        for id in &voided {
            let cancelled = tx
                .mark_reservation_cancelled(*id, now, Some(IMPORT_CANCEL_REASON), &cancelled_by)
                .await?;
            if !cancelled {
                tx.rollback().await?;
                return Err(StoreError::Conflict(format!(
                    "reservation {} changed during import",
                    id
                ))
                .into());
            }
            tx.release_children(*id, now).await?;
        }

        let mut families: HashMap<String, FamilyId> = HashMap::new();
        for key in incoming.keys() {
            if !families.contains_key(&key.family_number) {
                let id = tx.upsert_family(&key.family_number).await?;
                families.insert(key.family_number.clone(), id);
            }
        }

        let deleted = if options.remove_missing {
            tx.delete_all_children().await?;
            analysis.removed.len()
        } else {
            0
        };

        let mut restored = 0;
        for (key, profile) in &incoming {
            let family_id = families[&key.family_number];
            let old = previous.get(key);
            let id = tx
                .upsert_child(old.map(|c| c.id), family_id, &key.letter, profile)
                .await?;

            let Some(old) = old else { continue };
            let voided_hold = old.status == ChildStatus::Selected
                && old.reservation_id.is_some_and(|r| voided.contains(&r));
            let (status, reservation_id) = if voided_hold {
                (ChildStatus::Available, None)
            } else if options.preserve_status {
                (old.status, old.reservation_id)
            } else if old.status == ChildStatus::Inactive {
                (ChildStatus::Inactive, None)
            } else {
                (ChildStatus::Available, None)
            };
            tx.set_child_ledger(id, status, reservation_id).await?;
            if options.preserve_status && status != ChildStatus::Available {
                restored += 1;
            }
        }

        if options.remove_missing {
            tx.delete_empty_families().await?;
        }
        tx.commit().await?;

        for warning in &analysis.warnings {
            warn!(?warning, "Import warning");
        }
        for id in &voided {
            warn!(reservation_id = %id, "Pending reservation cancelled by import");
        }

        let report = ImportReport {
            restored,
            inserted: analysis.added.len(),
            updated: analysis.updated.len(),
            deleted,
            cancelled_reservations: voided.into_iter().collect(),
            analysis,
        };
        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            restored = report.restored,
            cancelled = report.cancelled_reservations.len(),
            "Roster imported"
        );
        Ok(report)
    }
}

/// Pending reservations that lose a child: every hold when statuses are
/// reset, and holds on children the roster drops when removal is requested.
fn voided_reservations(
    snapshot: &[Child],
    incoming: &BTreeMap<ChildKey, ChildProfile>,
    options: ImportOptions,
) -> BTreeSet<ReservationId> {
    snapshot
        .iter()
        .filter(|c| c.status == ChildStatus::Selected)
        .filter(|c| {
            let kept = incoming.contains_key(&c.key());
            (kept && !options.preserve_status) || (!kept && options.remove_missing)
        })
        .filter_map(|c| c.reservation_id)
        .collect()
}

async fn load_roster(source: &dyn RosterSource) -> SponsorshipResult<Vec<RosterEntry>> {
    let roster = source
        .load()
        .await
        .map_err(|e| SponsorshipError::validation(format!("{:#}", e)))?;

    if let Some((index, _)) = roster
        .iter()
        .enumerate()
        .find(|(_, e)| e.family_number.trim().is_empty() || e.letter.trim().is_empty())
    {
        return Err(SponsorshipError::validation(format!(
            "roster entry {} is missing a family number or letter",
            index + 1
        )));
    }

    Ok(roster)
}
