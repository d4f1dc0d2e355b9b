use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

use crate::common::{ChildId, FamilyId, ReservationId};

/// Lifecycle status of a child in the availability ledger.
///
/// ```text
/// Available ──► Selected ──► Sponsored
///     ▲             │
///     └─────────────┘   (cancel / expire)
/// Available ──► Inactive  (admin only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "child_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChildStatus {
    #[default]
    Available,
    Selected,
    Sponsored,
    Inactive,
}

impl ChildStatus {
    /// Whether the ledger permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ChildStatus) -> bool {
        use ChildStatus::*;
        match (self, next) {
            (Available, Selected) => true,
            (Selected, Sponsored) => true,
            (Selected, Available) => true,
            (Available, Inactive) => true,
            (Available, _) | (Selected, _) | (Sponsored, _) | (Inactive, _) => false,
        }
    }

    /// Held or sponsored: dropping such a child from the roster loses a commitment.
    pub fn is_committed(self) -> bool {
        match self {
            ChildStatus::Selected | ChildStatus::Sponsored => true,
            ChildStatus::Available | ChildStatus::Inactive => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChildStatus::Available => "available",
            ChildStatus::Selected => "selected",
            ChildStatus::Sponsored => "sponsored",
            ChildStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable roster key: family number plus the child's letter within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChildKey {
    pub family_number: String,
    pub letter: String,
}

impl ChildKey {
    pub fn new(family_number: impl Into<String>, letter: impl Into<String>) -> Self {
        Self {
            family_number: family_number.into().trim().to_string(),
            letter: letter.into().trim().to_uppercase(),
        }
    }

    /// Human-facing id, e.g. `37A`.
    pub fn display_id(&self) -> String {
        format!("{}{}", self.family_number, self.letter)
    }
}

impl std::fmt::Display for ChildKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.family_number, self.letter)
    }
}

/// Imported profile data for a child. Every field may be blank in a roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChildProfile {
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub grade: Option<String>,
    pub shirt_size: Option<String>,
    pub pant_size: Option<String>,
    pub shoe_size: Option<String>,
    pub interests: Option<String>,
    pub wishes: Option<String>,
    pub special_needs: Option<String>,
}

impl ChildProfile {
    /// Field names with their values rendered for diffing. Blank strings count as empty.
    pub fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("name", non_blank(&self.name)),
            ("age", self.age.map(|a| a.to_string())),
            ("gender", non_blank(&self.gender)),
            ("grade", non_blank(&self.grade)),
            ("shirt_size", non_blank(&self.shirt_size)),
            ("pant_size", non_blank(&self.pant_size)),
            ("shoe_size", non_blank(&self.shoe_size)),
            ("interests", non_blank(&self.interests)),
            ("wishes", non_blank(&self.wishes)),
            ("special_needs", non_blank(&self.special_needs)),
        ]
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A child row joined with its family number.
///
/// `reservation_id` is a weak back-reference: it names the reservation that
/// currently holds the child (status Selected) or that sponsored it
/// (status Sponsored). The reservation owns the mapping.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Child {
    pub id: ChildId,
    pub family_id: FamilyId,
    pub family_number: String,
    pub letter: String,
    #[sqlx(flatten)]
    pub profile: ChildProfile,
    pub status: ChildStatus,
    pub reservation_id: Option<ReservationId>,
    pub updated_at: DateTime<Utc>,
}

impl Child {
    pub fn key(&self) -> ChildKey {
        ChildKey::new(self.family_number.clone(), self.letter.clone())
    }

    pub fn display_id(&self) -> String {
        format!("{}{}", self.family_number, self.letter)
    }

    pub fn is_available(&self) -> bool {
        self.status == ChildStatus::Available
    }

    /// Whether this child is currently held by `reservation_id`.
    pub fn is_held_by(&self, reservation_id: ReservationId) -> bool {
        self.status == ChildStatus::Selected && self.reservation_id == Some(reservation_id)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

const CHILD_SELECT: &str = r#"
    SELECT c.id, c.family_id, f.family_number, c.letter,
           c.name, c.age, c.gender, c.grade, c.shirt_size, c.pant_size, c.shoe_size,
           c.interests, c.wishes, c.special_needs,
           c.status, c.reservation_id, c.updated_at
    FROM children c
    JOIN families f ON f.id = c.family_id
"#;

impl Child {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        id: ChildId,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{CHILD_SELECT} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_ids<'e, E: PgExecutor<'e>>(
        ids: &[ChildId],
        executor: E,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{CHILD_SELECT} WHERE c.id = ANY($1) ORDER BY c.id"))
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    /// Look a child up by roster key; the letter matches case-insensitively.
    pub async fn find_by_key<'e, E: PgExecutor<'e>>(
        key: &ChildKey,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "{CHILD_SELECT} WHERE f.family_number = $1 AND UPPER(TRIM(c.letter)) = $2"
        ))
        .bind(&key.family_number)
        .bind(&key.letter)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_family<'e, E: PgExecutor<'e>>(
        family_id: FamilyId,
        executor: E,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "{CHILD_SELECT} WHERE c.family_id = $1 ORDER BY c.letter"
        ))
        .bind(family_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!("{CHILD_SELECT} ORDER BY f.family_number, c.letter"))
            .fetch_all(executor)
            .await
    }

    /// Row-lock the given children plus every child in the given families.
    ///
    /// Rows are locked in id order so overlapping claims cannot deadlock.
    pub async fn lock_for_claim<'e, E: PgExecutor<'e>>(
        ids: &[ChildId],
        family_ids: &[FamilyId],
        executor: E,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(&format!(
            "{CHILD_SELECT} WHERE c.id = ANY($1) OR c.family_id = ANY($2) ORDER BY c.id FOR UPDATE OF c"
        ))
        .bind(ids)
        .bind(family_ids)
        .fetch_all(executor)
        .await
    }

    /// Available -> Selected for every id, only where still available.
    ///
    /// Returns the number of rows changed; callers compare it against `ids.len()`.
    pub async fn mark_selected<'e, E: PgExecutor<'e>>(
        ids: &[ChildId],
        reservation_id: ReservationId,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE children
            SET status = 'selected', reservation_id = $2, updated_at = $3
            WHERE id = ANY($1) AND status = 'available'
            "#,
        )
        .bind(ids)
        .bind(reservation_id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Selected -> Sponsored for children still held by `reservation_id`.
    /// The reservation reference is kept as provenance.
    pub async fn mark_sponsored<'e, E: PgExecutor<'e>>(
        reservation_id: ReservationId,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE children
            SET status = 'sponsored', updated_at = $2
            WHERE reservation_id = $1 AND status = 'selected'
            "#,
        )
        .bind(reservation_id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Selected -> Available for children still held by `reservation_id`.
    pub async fn release<'e, E: PgExecutor<'e>>(
        reservation_id: ReservationId,
        now: DateTime<Utc>,
        executor: E,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE children
            SET status = 'available', reservation_id = NULL, updated_at = $2
            WHERE reservation_id = $1 AND status = 'selected'
            "#,
        )
        .bind(reservation_id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count children per status.
    pub async fn count_by_status<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Vec<(ChildStatus, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (ChildStatus, i64)>(
            "SELECT status, COUNT(*) FROM children GROUP BY status",
        )
        .fetch_all(executor)
        .await
    }

    // Roster maintenance. Only the import path writes profiles.

    pub async fn delete_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM children").execute(executor).await?;
        Ok(result.rows_affected())
    }

    /// Write a profile under a known id, re-creating the row if it was deleted.
    pub async fn upsert_with_id<'e, E: PgExecutor<'e>>(
        id: ChildId,
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
        executor: E,
    ) -> Result<ChildId, sqlx::Error> {
        sqlx::query_scalar::<_, ChildId>(
            r#"
            INSERT INTO children (
                id, family_id, letter, name, age, gender, grade, shirt_size, pant_size,
                shoe_size, interests, wishes, special_needs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                family_id = EXCLUDED.family_id,
                letter = EXCLUDED.letter,
                name = EXCLUDED.name,
                age = EXCLUDED.age,
                gender = EXCLUDED.gender,
                grade = EXCLUDED.grade,
                shirt_size = EXCLUDED.shirt_size,
                pant_size = EXCLUDED.pant_size,
                shoe_size = EXCLUDED.shoe_size,
                interests = EXCLUDED.interests,
                wishes = EXCLUDED.wishes,
                special_needs = EXCLUDED.special_needs,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(family_id)
        .bind(letter)
        .bind(&profile.name)
        .bind(profile.age)
        .bind(&profile.gender)
        .bind(&profile.grade)
        .bind(&profile.shirt_size)
        .bind(&profile.pant_size)
        .bind(&profile.shoe_size)
        .bind(&profile.interests)
        .bind(&profile.wishes)
        .bind(&profile.special_needs)
        .fetch_one(executor)
        .await
    }

    /// Write a profile matched by (family, letter); new rows start Available.
    pub async fn upsert_by_key<'e, E: PgExecutor<'e>>(
        family_id: FamilyId,
        letter: &str,
        profile: &ChildProfile,
        executor: E,
    ) -> Result<ChildId, sqlx::Error> {
        sqlx::query_scalar::<_, ChildId>(
            r#"
            INSERT INTO children (
                family_id, letter, name, age, gender, grade, shirt_size, pant_size,
                shoe_size, interests, wishes, special_needs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (family_id, letter) DO UPDATE SET
                name = EXCLUDED.name,
                age = EXCLUDED.age,
                gender = EXCLUDED.gender,
                grade = EXCLUDED.grade,
                shirt_size = EXCLUDED.shirt_size,
                pant_size = EXCLUDED.pant_size,
                shoe_size = EXCLUDED.shoe_size,
                interests = EXCLUDED.interests,
                wishes = EXCLUDED.wishes,
                special_needs = EXCLUDED.special_needs,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(family_id)
        .bind(letter)
        .bind(&profile.name)
        .bind(profile.age)
        .bind(&profile.gender)
        .bind(&profile.grade)
        .bind(&profile.shirt_size)
        .bind(&profile.pant_size)
        .bind(&profile.shoe_size)
        .bind(&profile.interests)
        .bind(&profile.wishes)
        .bind(&profile.special_needs)
        .fetch_one(executor)
        .await
    }

    /// Overwrite status and reservation reference in one statement.
    pub async fn set_ledger<'e, E: PgExecutor<'e>>(
        id: ChildId,
        status: ChildStatus,
        reservation_id: Option<ReservationId>,
        executor: E,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE children SET status = $2, reservation_id = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(reservation_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Move the id sequence past explicitly inserted ids.
    pub async fn sync_id_sequence<'e, E: PgExecutor<'e>>(executor: E) -> Result<(), sqlx::Error> {
        sqlx::query(
            "SELECT setval(pg_get_serial_sequence('children', 'id'), GREATEST((SELECT MAX(id) FROM children), 1))",
        )
        .execute(executor)
        .await?;
        Ok(())
    }
}
