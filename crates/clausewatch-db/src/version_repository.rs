use chrono::{DateTime, Utc};
use clausewatch_core::error::AppError;
use clausewatch_core::models::{DocumentType, NewPolicyVersion, PolicyVersion};
use clausewatch_core::traits::VersionStore;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

const VERSION_COLUMNS: &str = "id, domain, document_type, source_url, content_hash, \
     normalized_text, structured_analysis, score, word_count, analyzed_at";

/// PostgreSQL store of analyzed policy versions.
#[derive(Clone)]
pub struct VersionRepository {
    pool: Pool<Postgres>,
}

impl VersionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a version, or refresh the analysis of the row that already
    /// holds the same content hash for this domain and document type.
    pub async fn upsert(&self, version: &NewPolicyVersion) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO policy_versions
                (domain, document_type, source_url, content_hash, normalized_text,
                 structured_analysis, score, word_count, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (domain, document_type, content_hash) DO UPDATE
            SET source_url = EXCLUDED.source_url,
                structured_analysis = EXCLUDED.structured_analysis,
                score = EXCLUDED.score,
                analyzed_at = EXCLUDED.analyzed_at
            RETURNING id
            "#,
        )
        .bind(&version.domain)
        .bind(version.document_type.as_str())
        .bind(&version.source_url)
        .bind(&version.content_hash)
        .bind(&version.normalized_text)
        .bind(&version.structured_analysis)
        .bind(version.score)
        .bind(version.word_count as i32)
        .bind(version.analyzed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        tracing::debug!(
            domain = %version.domain,
            document_type = %version.document_type,
            version_id = %row.0,
            "Upserted policy version"
        );
        Ok(row.0)
    }

    pub async fn get_latest(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> Result<Option<PolicyVersion>, AppError> {
        let row = sqlx::query_as::<_, PolicyVersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_versions \
             WHERE domain = $1 AND document_type = $2 \
             ORDER BY analyzed_at DESC LIMIT 1"
        ))
        .bind(domain)
        .bind(document_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    /// Version history, newest first.
    pub async fn get_history(
        &self,
        domain: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<PolicyVersion>, AppError> {
        let rows = sqlx::query_as::<_, PolicyVersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_versions \
             WHERE domain = $1 AND document_type = $2 \
             ORDER BY analyzed_at DESC LIMIT $3"
        ))
        .bind(domain)
        .bind(document_type.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<PolicyVersion>, AppError> {
        let row = sqlx::query_as::<_, PolicyVersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM policy_versions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::PersistenceError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct PolicyVersionRow {
    id: Uuid,
    domain: String,
    document_type: String,
    source_url: String,
    content_hash: String,
    normalized_text: String,
    structured_analysis: serde_json::Value,
    score: i32,
    word_count: i32,
    analyzed_at: DateTime<Utc>,
}

impl TryFrom<PolicyVersionRow> for PolicyVersion {
    type Error = AppError;

    fn try_from(row: PolicyVersionRow) -> Result<Self, Self::Error> {
        Ok(PolicyVersion {
            id: row.id,
            domain: row.domain,
            document_type: row
                .document_type
                .parse()
                .map_err(AppError::PersistenceError)?,
            source_url: row.source_url,
            content_hash: row.content_hash,
            normalized_text: row.normalized_text,
            structured_analysis: row.structured_analysis,
            score: row.score,
            word_count: row.word_count.max(0) as u32,
            analyzed_at: row.analyzed_at,
        })
    }
}

// -- Trait implementation --

impl VersionStore for VersionRepository {
    async fn get_latest_version(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> Result<Option<PolicyVersion>, AppError> {
        self.get_latest(domain, document_type).await
    }

    async fn upsert_version(&self, version: &NewPolicyVersion) -> Result<Uuid, AppError> {
        self.upsert(version).await
    }

    async fn list_versions(
        &self,
        domain: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<PolicyVersion>, AppError> {
        self.get_history(domain, document_type, limit).await
    }

    async fn get_version_by_id(&self, id: Uuid) -> Result<Option<PolicyVersion>, AppError> {
        self.get_by_id(id).await
    }
}
