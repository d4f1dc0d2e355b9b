//! Expiration reaper: releases children held by reservations whose hold
//! window has passed.
//!
//! Each candidate is expired in its own transaction with a compare-and-swap
//! on status, so a sweep can run concurrently with itself and with
//! confirm/cancel. Whichever transaction commits first wins; a reservation
//! confirmed a moment before the sweep reaches it is skipped.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::common::{ReservationId, SponsorshipResult};
use crate::domains::reservations::service::ReservationService;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Reservations found expired during the sweep.
    pub candidates: usize,
    pub expired_count: usize,
    pub released_child_count: usize,
    /// Candidates another transaction settled first.
    pub skipped: usize,
    /// Candidates whose release failed; retried on the next sweep.
    pub failed: Vec<ReservationId>,
}

pub struct ExpirationReaper {
    service: ReservationService,
}

impl ExpirationReaper {
    pub fn new(service: ReservationService) -> Self {
        Self { service }
    }

    /// Run one sweep over every reservation expired at the sweep's start.
    ///
    /// Candidates are read in pages of `sweep_batch_size`. Only listing the
    /// candidates can fail the sweep as a whole; a failure on an individual
    /// reservation is logged and counted.
    pub async fn sweep(&self) -> SponsorshipResult<CleanupReport> {
        let deps = self.service.deps();
        let now = deps.now();
        let batch = deps.settings.sweep_batch_size.max(1);

        let mut report = CleanupReport::default();
        let mut seen: HashSet<ReservationId> = HashSet::new();

        loop {
            // Candidates left unresolved can come back on every page; widen
            // the page so they cannot crowd out new work.
            let limit = batch + (report.failed.len() + report.skipped) as i64;
            let page = deps.store.find_expired_reservation_ids(now, limit).await?;
            let exhausted = (page.len() as i64) < limit;

            let fresh: Vec<ReservationId> =
                page.into_iter().filter(|id| seen.insert(*id)).collect();
            if fresh.is_empty() {
                break;
            }
            report.candidates += fresh.len();

            for id in fresh {
                match self.service.expire_reservation(id).await {
                    Ok(Some(released)) => {
                        report.expired_count += 1;
                        report.released_child_count += released;
                    }
                    Ok(None) => report.skipped += 1,
                    Err(e) => {
                        warn!(reservation_id = %id, error = %e, "Failed to expire reservation");
                        report.failed.push(id);
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        if report.candidates == 0 {
            return Ok(report);
        }

        info!(
            candidates = report.candidates,
            expired = report.expired_count,
            released_children = report.released_child_count,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Sweep: expired reservations"
        );

        Ok(report)
    }
}
