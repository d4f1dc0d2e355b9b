use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use typed_builder::TypedBuilder;

use crate::common::{ChildId, ReservationId};
use crate::domains::children::models::Child;
use crate::domains::reservations::token::ReservationToken;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Holding its children, awaiting confirmation.
    #[default]
    Selected,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            ReservationStatus::Selected => false,
            ReservationStatus::Confirmed
            | ReservationStatus::Cancelled
            | ReservationStatus::Expired => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Selected => "selected",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a claim on one child expands across its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "reservation_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationType {
    /// Exactly the requested children.
    #[default]
    Individual,
    /// The requested children plus their available siblings.
    Sibling,
    /// Every available child in the requested children's families.
    Family,
}

impl ReservationType {
    pub fn is_group(self) -> bool {
        match self {
            ReservationType::Individual => false,
            ReservationType::Sibling | ReservationType::Family => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationType::Individual => "individual",
            ReservationType::Sibling => "sibling",
            ReservationType::Family => "family",
        }
    }
}

impl std::str::FromStr for ReservationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "individual" => Ok(ReservationType::Individual),
            "sibling" | "siblings" => Ok(ReservationType::Sibling),
            "family" => Ok(ReservationType::Family),
            other => Err(format!("unknown reservation type '{}'", other)),
        }
    }
}

impl std::fmt::Display for ReservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sponsor contact
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SponsorContact {
    #[sqlx(rename = "sponsor_name")]
    pub name: String,
    #[sqlx(rename = "sponsor_email")]
    pub email: String,
    #[sqlx(rename = "sponsor_phone")]
    pub phone: Option<String>,
    #[sqlx(rename = "sponsor_address")]
    pub address: Option<String>,
}

impl SponsorContact {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            address: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

// ============================================================================
// Reservation Model
// ============================================================================

/// A sponsor's claim on one or more children.
///
/// While `status` is Selected, `child_ids` is exactly the set of children whose
/// `reservation_id` points back here. Exactly one of Confirmed, Cancelled or
/// Expired is ever reached, and only from Selected.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TypedBuilder)]
pub struct Reservation {
    #[builder(default = ReservationId::new())]
    pub id: ReservationId,
    #[builder(default = ReservationToken::generate())]
    pub token: ReservationToken,
    #[sqlx(flatten)]
    pub sponsor: SponsorContact,
    pub reservation_type: ReservationType,
    #[builder(default)]
    pub status: ReservationStatus,
    pub child_ids: Vec<ChildId>,
    pub selected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub expired_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub cancel_reason: Option<String>,
    #[builder(default, setter(strip_option))]
    pub cancelled_by: Option<String>,
    #[builder(default)]
    pub notes: Option<String>,
}

impl Reservation {
    /// Past its hold window at `now`, regardless of whether a sweep has run.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Still holding its children at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Selected && !self.is_expired_at(now)
    }
}

/// Read model returned by lookups.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub children: Vec<Child>,
    /// Computed at read time; reading never mutates the reservation.
    pub is_expired: bool,
}

impl ReservationView {
    pub fn new(reservation: Reservation, children: Vec<Child>, now: DateTime<Utc>) -> Self {
        let is_expired = match reservation.status {
            ReservationStatus::Selected => reservation.is_expired_at(now),
            ReservationStatus::Expired => true,
            ReservationStatus::Confirmed | ReservationStatus::Cancelled => false,
        };
        Self {
            reservation,
            children,
            is_expired,
        }
    }

    pub fn display_ids(&self) -> Vec<String> {
        self.children.iter().map(Child::display_id).collect()
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

const RESERVATION_SELECT: &str = r#"
    SELECT id, token, sponsor_name, sponsor_email, sponsor_phone, sponsor_address,
           reservation_type, status, child_ids, selected_at, expires_at,
           confirmed_at, cancelled_at, expired_at, cancel_reason, cancelled_by, notes
    FROM reservations
"#;

impl Reservation {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, token, sponsor_name, sponsor_email, sponsor_phone, sponsor_address,
                reservation_type, status, child_ids, selected_at, expires_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(self.id)
        .bind(&self.token)
        .bind(&self.sponsor.name)
        .bind(&self.sponsor.email)
        .bind(&self.sponsor.phone)
        .bind(&self.sponsor.address)
        .bind(self.reservation_type)
        .bind(self.status)
        .bind(&self.child_ids)
        .bind(self.selected_at)
        .bind(self.expires_at)
        .bind(&self.notes)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_by_token<'e, E: PgExecutor<'e>>(
        token: &ReservationToken,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{RESERVATION_SELECT} WHERE token = $1"))
            .bind(token)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        id: ReservationId,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{RESERVATION_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Fetch and row-lock a reservation for a status transition.
    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(
        id: ReservationId,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{RESERVATION_SELECT} WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_sponsor_email<'e, E: PgExecutor<'e>>(
        email: &str,
        executor: E,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "{RESERVATION_SELECT} WHERE LOWER(sponsor_email) = LOWER($1) ORDER BY selected_at DESC"
        ))
        .bind(email)
        .fetch_all(executor)
        .await
    }

    /// Ids of pending reservations whose hold window ended before `now`.
    pub async fn find_expired_ids<'e, E: PgExecutor<'e>>(
        now: DateTime<Utc>,
        limit: i64,
        executor: E,
    ) -> Result<Vec<ReservationId>, sqlx::Error> {
        sqlx::query_scalar::<_, ReservationId>(
            r#"
            SELECT id FROM reservations
            WHERE status = 'selected' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Selected -> Confirmed, only while still selected and inside the hold window.
    pub async fn mark_confirmed<'e, E: PgExecutor<'e>>(
        id: ReservationId,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'confirmed', confirmed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'selected' AND expires_at >= $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Selected -> Cancelled.
    pub async fn mark_cancelled<'e, E: PgExecutor<'e>>(
        id: ReservationId,
        now: DateTime<Utc>,
        reason: Option<&str>,
        cancelled_by: &str,
        executor: E,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'cancelled', cancelled_at = $2, cancel_reason = $3,
                cancelled_by = $4, updated_at = $2
            WHERE id = $1 AND status = 'selected'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(reason)
        .bind(cancelled_by)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Selected -> Expired, only once the hold window has passed.
    pub async fn mark_expired<'e, E: PgExecutor<'e>>(
        id: ReservationId,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'expired', expired_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'selected' AND expires_at < $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_by_status<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Vec<(ReservationStatus, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (ReservationStatus, i64)>(
            "SELECT status, COUNT(*) FROM reservations GROUP BY status",
        )
        .fetch_all(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(expires_in: Duration) -> Reservation {
        let now = Utc::now();
        Reservation::builder()
            .sponsor(SponsorContact::new("Ada", "ada@example.org"))
            .reservation_type(ReservationType::Individual)
            .child_ids(vec![ChildId::new(1)])
            .selected_at(now)
            .expires_at(now + expires_in)
            .build()
    }

    #[test]
    fn test_builder_defaults_to_selected_with_fresh_token() {
        let a = reservation(Duration::hours(2));
        let b = reservation(Duration::hours(2));
        assert_eq!(a.status, ReservationStatus::Selected);
        assert_ne!(a.token, b.token);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_view_reports_expiry_without_mutating_status() {
        let r = reservation(Duration::hours(1));
        let later = r.selected_at + Duration::hours(2);
        let view = ReservationView::new(r, vec![], later);
        assert!(view.is_expired);
        assert_eq!(view.reservation.status, ReservationStatus::Selected);
    }

    #[test]
    fn test_confirmed_view_is_never_expired() {
        let mut r = reservation(Duration::hours(1));
        r.status = ReservationStatus::Confirmed;
        let later = r.selected_at + Duration::days(30);
        assert!(!ReservationView::new(r, vec![], later).is_expired);
    }

    #[test]
    fn test_reservation_type_parses_loosely() {
        assert_eq!("Sibling".parse::<ReservationType>(), Ok(ReservationType::Sibling));
        assert_eq!(" family ".parse::<ReservationType>(), Ok(ReservationType::Family));
        assert!("group".parse::<ReservationType>().is_err());
    }

    #[test]
    fn test_group_types() {
        assert!(!ReservationType::Individual.is_group());
        assert!(ReservationType::Sibling.is_group());
        assert!(ReservationType::Family.is_group());
    }
}
