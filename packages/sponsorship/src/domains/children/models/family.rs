use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;

use super::child::{Child, ChildStatus};
use crate::common::FamilyId;
use crate::domains::reservations::models::ReservationType;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Family {
    pub id: FamilyId,
    pub family_number: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derived availability counts for one family. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilySummary {
    pub family_id: FamilyId,
    pub family_number: String,
    pub total: usize,
    pub available: usize,
    pub selected: usize,
    pub sponsored: usize,
    pub inactive: usize,
    /// Claim types a sponsor may currently be offered for this family.
    pub offerable: Vec<ReservationType>,
}

impl FamilySummary {
    /// Summarize `children`, which must all belong to the same family.
    pub fn from_children(family_id: FamilyId, family_number: &str, children: &[Child]) -> Self {
        let count = |status: ChildStatus| children.iter().filter(|c| c.status == status).count();

        let total = children.len();
        let available = count(ChildStatus::Available);

        let mut offerable = Vec::new();
        if available >= 1 {
            offerable.push(ReservationType::Individual);
        }
        // Group claims only make sense for multi-child families with at
        // least two children left to claim.
        if total >= 2 && available >= 2 {
            offerable.push(ReservationType::Sibling);
            offerable.push(ReservationType::Family);
        }

        Self {
            family_id,
            family_number: family_number.to_string(),
            total,
            available,
            selected: count(ChildStatus::Selected),
            sponsored: count(ChildStatus::Sponsored),
            inactive: count(ChildStatus::Inactive),
            offerable,
        }
    }

    pub fn is_offerable(&self, reservation_type: ReservationType) -> bool {
        self.offerable.contains(&reservation_type)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Family {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        id: FamilyId,
        executor: E,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT id, family_number, notes, created_at FROM families WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT id, family_number, notes, created_at FROM families ORDER BY family_number",
        )
        .fetch_all(executor)
        .await
    }

    /// Insert a family or return the existing one with the same number.
    pub async fn upsert_by_number<'e, E: PgExecutor<'e>>(
        family_number: &str,
        executor: E,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO families (family_number)
            VALUES ($1)
            ON CONFLICT (family_number) DO UPDATE SET updated_at = NOW()
            RETURNING id, family_number, notes, created_at
            "#,
        )
        .bind(family_number)
        .fetch_one(executor)
        .await
    }

    /// Remove families left without children after an import.
    pub async fn delete_empty<'e, E: PgExecutor<'e>>(executor: E) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM families f WHERE NOT EXISTS (SELECT 1 FROM children c WHERE c.family_id = f.id)",
        )
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
