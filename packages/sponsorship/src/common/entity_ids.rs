//! Typed ID definitions for all domain entities.
//!
//! ```rust
//! use sponsorship_core::common::{ChildId, FamilyId};
//!
//! let child_id = ChildId::new(37);
//! let family_id = FamilyId::new(37);
//!
//! // This would be a compile error:
//! // let wrong: FamilyId = child_id;
//! ```

pub use super::id::{Id, SerialId};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Family entities.
pub struct Family;

/// Marker type for Child entities.
pub struct Child;

/// Marker type for Reservation entities (pending or settled sponsorships).
pub struct Reservation;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for Family entities.
pub type FamilyId = SerialId<Family>;

/// Typed ID for Child entities.
pub type ChildId = SerialId<Child>;

/// Typed ID for Reservation entities.
pub type ReservationId = Id<Reservation>;
