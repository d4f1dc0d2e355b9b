//! Test fixtures for building requests and rosters.

#![allow(dead_code)]

use sponsorship_core::common::{ChildId, OperationContext, SponsorshipResult};
use sponsorship_core::domains::children::ChildProfile;
use sponsorship_core::domains::imports::RosterEntry;
use sponsorship_core::domains::reservations::{
    HoldWindow, NewReservation, ReservationReceipt, ReservationService, ReservationType,
    SponsorContact,
};

pub fn sponsor(name: &str) -> SponsorContact {
    SponsorContact::new(name, format!("{}@example.org", name.to_lowercase()))
}

pub fn claim(
    sponsor_name: &str,
    child_ids: &[ChildId],
    reservation_type: ReservationType,
    hold: HoldWindow,
) -> NewReservation {
    NewReservation {
        sponsor: sponsor(sponsor_name),
        child_ids: child_ids.to_vec(),
        reservation_type,
        hold,
        notes: None,
    }
}

/// Individual claim on the 2 hour selection window.
pub async fn reserve(
    service: &ReservationService,
    sponsor_name: &str,
    child_ids: &[ChildId],
) -> SponsorshipResult<ReservationReceipt> {
    let ctx = OperationContext::sponsor(format!("{}@example.org", sponsor_name.to_lowercase()));
    service
        .create_reservation(
            &ctx,
            claim(
                sponsor_name,
                child_ids,
                ReservationType::Individual,
                HoldWindow::selection(),
            ),
        )
        .await
}

pub fn roster_entry(family_number: &str, letter: &str, name: &str, age: i32) -> RosterEntry {
    RosterEntry::builder()
        .family_number(family_number)
        .letter(letter)
        .profile(ChildProfile {
            name: Some(name.to_string()),
            age: Some(age),
            ..Default::default()
        })
        .build()
}

/// Family number unlikely to collide across tests sharing a database.
pub fn unique_family_number() -> String {
    let raw = uuid::Uuid::new_v4().as_u128() % 1_000_000_000;
    format!("T{}", raw)
}
