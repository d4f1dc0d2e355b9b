//! Kernel module - infrastructure and dependencies.

pub mod deps;
pub mod pg_store;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use deps::{LoggingNotifier, ReservationSettings, SponsorshipDeps, SystemClock};
pub use pg_store::PgSponsorshipStore;
pub use scheduled_tasks::{start_reaper, DEFAULT_CLEANUP_CRON};
pub use test_dependencies::{
    FailingNotifier, ManualClock, MemoryStore, RecordingNotifier, TestDependencies,
};
pub use traits::*;
