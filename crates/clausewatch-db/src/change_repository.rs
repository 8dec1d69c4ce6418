use chrono::{DateTime, Utc};
use clausewatch_core::error::AppError;
use clausewatch_core::models::{ChangeRecord, NewChangeRecord};
use clausewatch_core::traits::ChangeStore;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// PostgreSQL store of detected policy changes.
#[derive(Clone)]
pub struct ChangeRepository {
    pool: Pool<Postgres>,
}

impl ChangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, change: &NewChangeRecord) -> Result<ChangeRecord, AppError> {
        let row = sqlx::query_as::<_, ChangeRow>(
            r#"
            INSERT INTO policy_changes
                (domain, document_type, previous_version_id, current_version_id,
                 previous_score, current_score, score_delta, previous_analysis, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&change.domain)
        .bind(change.document_type.as_str())
        .bind(change.previous_version_id)
        .bind(change.current_version_id)
        .bind(change.previous_score)
        .bind(change.current_score)
        .bind(change.score_delta())
        .bind(&change.previous_analysis)
        .bind(&change.summary)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        row.try_into()
    }

    /// Undismissed changes, newest first.
    pub async fn list_open(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT * FROM policy_changes
            WHERE dismissed_at IS NULL
              AND ($1::VARCHAR IS NULL OR domain = $1)
            ORDER BY detected_at DESC
            LIMIT $2
            "#,
        )
        .bind(domain)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Returns false if the change does not exist or was already dismissed.
    pub async fn dismiss(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE policy_changes
            SET dismissed_at = NOW()
            WHERE id = $1 AND dismissed_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    domain: String,
    document_type: String,
    previous_version_id: Uuid,
    current_version_id: Uuid,
    previous_score: i32,
    current_score: i32,
    score_delta: i32,
    previous_analysis: serde_json::Value,
    summary: String,
    detected_at: DateTime<Utc>,
    dismissed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChangeRow> for ChangeRecord {
    type Error = AppError;

    fn try_from(row: ChangeRow) -> Result<Self, Self::Error> {
        Ok(ChangeRecord {
            id: row.id,
            domain: row.domain,
            document_type: row
                .document_type
                .parse()
                .map_err(AppError::PersistenceError)?,
            previous_version_id: row.previous_version_id,
            current_version_id: row.current_version_id,
            previous_score: row.previous_score,
            current_score: row.current_score,
            score_delta: row.score_delta,
            previous_analysis: row.previous_analysis,
            summary: row.summary,
            detected_at: row.detected_at,
            dismissed_at: row.dismissed_at,
        })
    }
}

// -- Trait implementation --

impl ChangeStore for ChangeRepository {
    async fn record_change(&self, change: &NewChangeRecord) -> Result<ChangeRecord, AppError> {
        self.insert(change).await
    }

    async fn list_changes(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        self.list_open(domain, limit).await
    }

    async fn dismiss_change(&self, id: Uuid) -> Result<bool, AppError> {
        self.dismiss(id).await
    }
}
