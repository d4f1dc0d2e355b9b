//! Reservations domain - claiming children for sponsors
//!
//! Architecture:
//!   api / admin CLI → ReservationService → store transaction (kernel traits)
//!   scheduler → ExpirationReaper → ReservationService::expire_reservation

pub mod events;
pub mod group;
pub mod hold;
pub mod models;
pub mod reaper;
pub mod service;
pub mod token;
pub mod validation;

// Re-export commonly used types
pub use events::{SponsorshipEvent, SponsorshipEventKind};
pub use hold::{HoldFlow, HoldPolicy, HoldWindow};
pub use models::{Reservation, ReservationStatus, ReservationType, ReservationView, SponsorContact};
pub use reaper::{CleanupReport, ExpirationReaper};
pub use service::{CleanupSummary, NewReservation, ReservationReceipt, ReservationService};
pub use token::ReservationToken;
