//! Events emitted to the notification collaborator after a commit.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domains::children::models::Child;
use crate::domains::reservations::models::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorshipEventKind {
    Created,
    Confirmed,
    Cancelled,
}

/// Snapshot of a reservation and its children as committed.
#[derive(Debug, Clone, Serialize)]
pub struct SponsorshipEvent {
    pub kind: SponsorshipEventKind,
    pub reservation: Reservation,
    pub children: Vec<Child>,
    pub occurred_at: DateTime<Utc>,
}

impl SponsorshipEvent {
    pub fn new(
        kind: SponsorshipEventKind,
        reservation: Reservation,
        children: Vec<Child>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            reservation,
            children,
            occurred_at,
        }
    }
}
