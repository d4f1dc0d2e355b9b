// Common types and utilities shared across the crate

pub mod context;
pub mod entity_ids;
pub mod errors;
pub mod id;

pub use context::{Actor, OperationContext};
pub use entity_ids::{ChildId, FamilyId, ReservationId};
pub use errors::{SponsorshipError, SponsorshipResult};
pub use id::{Id, SerialId};
