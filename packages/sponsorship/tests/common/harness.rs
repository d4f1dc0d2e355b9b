//! Test harnesses.
//!
//! `TestHarness` runs the services over the in-memory store with a manual
//! clock and a recording notifier. `PgTestHarness` runs them over Postgres in
//! a shared testcontainers instance, started once on first use.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::Duration;
use sponsorship_core::api::SponsorshipApi;
use sponsorship_core::domains::children::AvailabilityLedger;
use sponsorship_core::domains::imports::ImportReconciler;
use sponsorship_core::domains::reservations::ReservationService;
use sponsorship_core::kernel::{
    BaseNotifier, ManualClock, MemoryStore, PgSponsorshipStore, RecordingNotifier,
    ReservationSettings, SponsorshipDeps, TestDependencies,
};
use sqlx::PgPool;
use std::sync::Arc;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// In-memory harness
// =============================================================================

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub deps: SponsorshipDeps,
    pub service: ReservationService,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {}
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();
        let test_deps = TestDependencies::new();
        let store = test_deps.store.clone();
        let clock = test_deps.clock.clone();
        let notifier = test_deps.notifier.clone();
        let deps = test_deps.into_deps();

        Self {
            store,
            clock,
            notifier,
            service: ReservationService::new(deps.clone()),
            deps,
        }
    }

    /// Same harness, but events go to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn BaseNotifier>) -> Self {
        self.deps = self.deps.with_notifier(notifier);
        self.service = ReservationService::new(self.deps.clone());
        self
    }

    /// Same harness, with `settings` in place of the defaults.
    pub fn with_settings(mut self, settings: ReservationSettings) -> Self {
        self.deps = self.deps.with_settings(settings);
        self.service = ReservationService::new(self.deps.clone());
        self
    }

    pub fn api(&self) -> SponsorshipApi {
        SponsorshipApi::new(self.service.clone())
    }

    pub fn ledger(&self) -> AvailabilityLedger {
        AvailabilityLedger::new(self.deps.clone())
    }

    pub fn importer(&self) -> ImportReconciler {
        ImportReconciler::new(self.deps.clone())
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }

    /// Let fire-and-forget notifications run.
    pub async fn settle(&self) {
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
}

// =============================================================================
// Postgres harness
// =============================================================================

/// Shared container; started once and reused by every Postgres test.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Services over a real database. Tests share the database, so each one
/// uses its own family numbers.
pub struct PgTestHarness {
    pub db_pool: PgPool,
    pub store: Arc<PgSponsorshipStore>,
    pub deps: SponsorshipDeps,
    pub service: ReservationService,
}

impl AsyncTestContext for PgTestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Database pool is automatically dropped
    }
}

impl PgTestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        let store = Arc::new(PgSponsorshipStore::new(db_pool.clone()));
        let deps = SponsorshipDeps::new(store.clone()).with_notifier(Arc::new(RecordingNotifier::new()));

        Ok(Self {
            db_pool,
            store,
            service: ReservationService::new(deps.clone()),
            deps,
        })
    }

    pub fn importer(&self) -> ImportReconciler {
        ImportReconciler::new(self.deps.clone())
    }
}
