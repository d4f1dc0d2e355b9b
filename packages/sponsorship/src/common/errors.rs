use thiserror::Error;

use super::ChildId;

pub type SponsorshipResult<T> = std::result::Result<T, SponsorshipError>;

/// Errors surfaced by the sponsorship core.
///
/// Everything except `StorageFailure` is an expected outcome of a request
/// and is safe to show to the sponsor or administrator.
#[derive(Error, Debug)]
pub enum SponsorshipError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Children no longer available: {}", display_ids.join(", "))]
    Unavailable {
        child_ids: Vec<ChildId>,
        display_ids: Vec<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reservation has already been confirmed")]
    AlreadyConfirmed,

    #[error("Reservation has already been cancelled")]
    AlreadyCancelled,

    #[error("Reservation has expired")]
    Expired,

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl SponsorshipError {
    /// Stable machine-readable code for the plain-data API.
    pub fn code(&self) -> &'static str {
        match self {
            SponsorshipError::Validation(_) => "validation_error",
            SponsorshipError::Unavailable { .. } => "unavailable",
            SponsorshipError::NotFound(_) => "not_found",
            SponsorshipError::AlreadyConfirmed => "already_confirmed",
            SponsorshipError::AlreadyCancelled => "already_cancelled",
            SponsorshipError::Expired => "expired",
            SponsorshipError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Message safe to hand back to a caller. Storage causes are logged, not exposed.
    pub fn public_message(&self) -> String {
        match self {
            SponsorshipError::StorageFailure(_) => {
                "The request could not be completed, please try again".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SponsorshipError::Validation(message.into())
    }
}

/// Errors raised by a store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization failure or deadlock; the whole transaction may be retried.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

// Postgres SQLSTATE codes for serialization_failure and deadlock_detected.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| RETRYABLE_SQLSTATES.contains(&&*code))
            .unwrap_or(false);

        if retryable {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}
