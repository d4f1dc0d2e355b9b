//! Standalone expiration reaper.
//!
//! Sweeps once at startup, then on CLEANUP_CRON until interrupted. Safe to run next to the
//! web process or as several replicas.

use anyhow::{Context, Result};
use sponsorship_core::config::Config;
use sponsorship_core::domains::reservations::{ExpirationReaper, ReservationService};
use sponsorship_core::kernel::{
    start_reaper, PgSponsorshipStore, ReservationSettings, SponsorshipDeps,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sponsorship_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let store = PgSponsorshipStore::connect(&config)
        .await
        .context("Failed to connect to database")?;
    let settings = ReservationSettings::try_from(&config).context("Invalid hold configuration")?;
    let deps = SponsorshipDeps::new(Arc::new(store)).with_settings(settings);
    let service = ReservationService::new(deps);

    // Holds that lapsed while the reaper was down are released now rather
    // than on the first cron tick.
    if let Err(e) = ExpirationReaper::new(service.clone()).sweep().await {
        tracing::error!(error = %e, "Startup sweep failed");
    }

    let mut scheduler = start_reaper(service, &config.cleanup_cron)
        .await
        .context("Failed to start expiration sweep")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down reaper");
    scheduler.shutdown().await?;
    Ok(())
}
