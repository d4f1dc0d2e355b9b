//! Administrative CLI: sweeps, statistics and roster imports.
//!
//! Every command prints a single JSON document on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sponsorship_core::common::OperationContext;
use sponsorship_core::config::Config;
use sponsorship_core::domains::children::AvailabilityLedger;
use sponsorship_core::domains::imports::{ImportOptions, ImportReconciler, JsonRosterFile};
use sponsorship_core::domains::reservations::{ExpirationReaper, ReservationService};
use sponsorship_core::kernel::{PgSponsorshipStore, ReservationSettings, SponsorshipDeps};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sponsorship_admin")]
#[command(about = "Sponsorship program administration")]
struct Cli {
    /// Recorded as the actor on every change
    #[arg(long, env = "ADMIN_NAME", default_value = "cli")]
    admin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Release every reservation whose hold has lapsed
    Cleanup,

    /// Child and reservation counts by status
    Stats,

    /// Show what importing a roster would change
    AnalyzeImport { file: PathBuf },

    /// Import a roster, keeping each child's status
    ApplyImport {
        file: PathBuf,
        /// Reset statuses to Available instead of carrying them over
        #[arg(long)]
        no_preserve: bool,
        /// Delete children missing from the roster
        #[arg(long)]
        remove_missing: bool,
    },
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,sponsorship_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let store = PgSponsorshipStore::connect(&config)
        .await
        .context("Failed to connect to database")?;
    let deps = SponsorshipDeps::new(Arc::new(store))
        .with_settings(
            ReservationSettings::try_from(&config).context("Invalid hold configuration")?,
        );
    let ctx = OperationContext::admin(cli.admin);

    match cli.command {
        Commands::Cleanup => {
            let service = ReservationService::new(deps);
            let report = ExpirationReaper::new(service).sweep().await?;
            output(&report)
        }
        Commands::Stats => {
            let stats = AvailabilityLedger::new(deps).program_stats().await?;
            output(&stats)
        }
        Commands::AnalyzeImport { file } => {
            let analysis = ImportReconciler::new(deps)
                .analyze(&JsonRosterFile::new(file))
                .await?;
            output(&analysis)
        }
        Commands::ApplyImport {
            file,
            no_preserve,
            remove_missing,
        } => {
            let options = ImportOptions {
                preserve_status: !no_preserve,
                remove_missing,
            };
            let report = ImportReconciler::new(deps)
                .apply_with_preservation(&ctx, &JsonRosterFile::new(file), options)
                .await?;
            output(&report)
        }
    }
}
