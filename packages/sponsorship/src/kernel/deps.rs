//! Service dependencies (using traits for testability)
//!
//! The reservation, ledger and import services are stateless; everything they
//! touch is reached through this container.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::common::SponsorshipError;
use crate::config::Config;
use crate::domains::reservations::events::SponsorshipEvent;
use crate::domains::reservations::hold::HoldPolicy;
use crate::kernel::{BaseClock, BaseNotifier, BaseSponsorshipStore};

// =============================================================================
// Default infrastructure
// =============================================================================

/// Wall-clock time.
pub struct SystemClock;

impl BaseClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Notifier that only records events in the log. Used when no delivery
/// channel is configured.
pub struct LoggingNotifier;

#[async_trait]
impl BaseNotifier for LoggingNotifier {
    async fn notify(&self, event: &SponsorshipEvent) -> Result<()> {
        tracing::info!(
            kind = ?event.kind,
            reservation_id = %event.reservation.id,
            sponsor = %event.reservation.sponsor.email,
            children = event.children.len(),
            "Sponsorship event"
        );
        Ok(())
    }
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// Extra attempts after a transaction conflict before giving up.
    pub max_store_retries: u32,
    /// Expired reservations read per page of a sweep.
    pub sweep_batch_size: i64,
    /// Upper bound on children requested in one claim.
    pub max_children_per_claim: usize,
    /// Default hold per flow when a caller does not pick one.
    pub holds: HoldPolicy,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            max_store_retries: 3,
            sweep_batch_size: 500,
            max_children_per_claim: 50,
            holds: HoldPolicy::default(),
        }
    }
}

impl TryFrom<&Config> for ReservationSettings {
    type Error = SponsorshipError;

    fn try_from(config: &Config) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            max_store_retries: config.store_max_retries,
            holds: HoldPolicy::from_config(config)?,
            ..Self::default()
        })
    }
}

// =============================================================================
// SponsorshipDeps
// =============================================================================

#[derive(Clone)]
pub struct SponsorshipDeps {
    pub store: Arc<dyn BaseSponsorshipStore>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub clock: Arc<dyn BaseClock>,
    pub settings: ReservationSettings,
}

impl SponsorshipDeps {
    pub fn new(store: Arc<dyn BaseSponsorshipStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(LoggingNotifier),
            clock: Arc::new(SystemClock),
            settings: ReservationSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn BaseNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn BaseClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: ReservationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
