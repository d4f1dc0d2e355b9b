//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (CLEANUP_CRON, default every 5 minutes)
//!     │
//!     └─► ExpirationReaper::sweep()
//!             └─► For each expired reservation → expire + release children
//! ```
//!
//! The sweep is safe to run concurrently with itself and with
//! confirm/cancel, so overlapping ticks need no coordination.

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::reservations::{ExpirationReaper, ReservationService};

/// Every five minutes, on the minute.
pub const DEFAULT_CLEANUP_CRON: &str = "0 */5 * * * *";

/// Start the expiration sweep on `cron`.
pub async fn start_reaper(service: ReservationService, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_service = service.clone();
    let sweep_job = Job::new_async(cron, move |_uuid, _lock| {
        let service = sweep_service.clone();
        Box::pin(async move {
            run_sweep(service).await;
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!(cron, "Scheduled tasks started (expiration sweep)");
    Ok(scheduler)
}

/// Run one sweep, logging instead of propagating failures so the schedule keeps running.
async fn run_sweep(service: ReservationService) {
    match ExpirationReaper::new(service).sweep().await {
        Ok(report) if !report.failed.is_empty() => {
            tracing::warn!(
                failed = report.failed.len(),
                "Expiration sweep left reservations for the next run"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Expiration sweep failed: {}", e),
    }
}
