//! Children domain - families, children and the availability ledger

pub mod ledger;
pub mod models;

pub use ledger::{AvailabilityLedger, ProgramStats};
pub use models::{Child, ChildKey, ChildProfile, ChildStatus, Family, FamilySummary};
