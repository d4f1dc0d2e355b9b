//! Request validation performed before any transaction opens.

use lazy_static::lazy_static;
use regex::Regex;

use crate::common::{ChildId, SponsorshipError, SponsorshipResult};
use crate::domains::reservations::models::SponsorContact;

const MAX_NAME_LEN: usize = 200;

lazy_static! {
    // Email pattern - RFC 5322 simplified
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$"
    ).unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}

/// Validate and normalize sponsor contact details.
///
/// Whitespace is trimmed, the email is lower-cased and blank optional fields
/// become `None`.
pub fn validate_sponsor(sponsor: &SponsorContact) -> SponsorshipResult<SponsorContact> {
    let name = sponsor.name.trim();
    if name.is_empty() {
        return Err(SponsorshipError::validation("sponsor name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(SponsorshipError::validation("sponsor name is too long"));
    }

    let email = sponsor.email.trim();
    if email.is_empty() {
        return Err(SponsorshipError::validation("sponsor email is required"));
    }
    if !is_valid_email(email) {
        return Err(SponsorshipError::validation(format!(
            "'{}' is not a valid email address",
            email
        )));
    }

    let phone = blank_to_none(sponsor.phone.as_deref());
    if let Some(phone) = &phone {
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if !(7..=15).contains(&digits) {
            return Err(SponsorshipError::validation(format!(
                "'{}' is not a valid phone number",
                phone
            )));
        }
    }

    Ok(SponsorContact {
        name: name.to_string(),
        email: email.to_lowercase(),
        phone,
        address: blank_to_none(sponsor.address.as_deref()),
    })
}

/// De-duplicate requested ids, keeping first occurrence order.
pub fn validate_child_ids(ids: &[ChildId], max: usize) -> SponsorshipResult<Vec<ChildId>> {
    let mut unique: Vec<ChildId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(*id);
        }
    }

    if unique.is_empty() {
        return Err(SponsorshipError::validation("at least one child must be selected"));
    }
    if unique.len() > max {
        return Err(SponsorshipError::validation(format!(
            "at most {} children may be requested at once",
            max
        )));
    }
    Ok(unique)
}

fn blank_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
