//! Opaque reservation tokens used in confirmation links.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a token in hex characters.
pub const TOKEN_LEN: usize = 64;

/// Unguessable external handle for a reservation.
///
/// Built from two random v4 UUIDs (244 random bits). Only a short prefix is
/// ever written to logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ReservationToken(String);

impl ReservationToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self(hex::encode(bytes))
    }

    /// Accepts a token supplied by a caller. Returns `None` for anything that
    /// could not have been issued, so malformed input never reaches the store.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == TOKEN_LEN
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for logs.
    pub fn prefix(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Debug for ReservationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReservationToken({}…)", self.prefix())
    }
}

impl std::fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
