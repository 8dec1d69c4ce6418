use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Analysis, ChangeRecord, DocumentType, ExtractedDocument, FetchedDocument, HttpResponse,
    NewChangeRecord, NewPolicyVersion, PolicyVersion,
};

/// A single outbound GET as issued by the fetch cascade.
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub timeout: Duration,
}

/// Performs one HTTP GET, following redirects.
///
/// Non-success statuses are returned as responses, not errors; only failures
/// that produce no status at all (DNS, connect, timeout) are `Err`.
pub trait Transport: Send + Sync + Clone {
    fn get(
        &self,
        request: TransportRequest<'_>,
    ) -> impl Future<Output = Result<HttpResponse, AppError>> + Send;
}

/// Acquires the raw bytes of a document URL by whatever means necessary.
pub trait Acquirer: Send + Sync + Clone {
    fn acquire(&self, url: &str) -> impl Future<Output = Result<FetchedDocument, AppError>> + Send;
}

/// Turns raw document bytes into normalized policy text.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        url: &str,
    ) -> Result<ExtractedDocument, AppError>;
}

/// The external analysis collaborator: scores a document and returns
/// structured findings. The core persists the result verbatim.
pub trait Analyzer: Send + Sync + Clone {
    fn analyze(&self, text: &str) -> impl Future<Output = Result<Analysis, AppError>> + Send;
}

/// Versioned storage of analyzed policy documents.
pub trait VersionStore: Send + Sync + Clone {
    /// Most recent version for a domain + document type.
    fn get_latest_version(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> impl Future<Output = Result<Option<PolicyVersion>, AppError>> + Send;

    /// Insert, or update the existing row with the same
    /// (domain, document_type, content_hash). Returns the row id either way.
    fn upsert_version(
        &self,
        version: &NewPolicyVersion,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Version history, newest first.
    fn list_versions(
        &self,
        domain: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<PolicyVersion>, AppError>> + Send;

    fn get_version_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<PolicyVersion>, AppError>> + Send;
}

/// Storage of detected changes.
pub trait ChangeStore: Send + Sync + Clone {
    fn record_change(
        &self,
        change: &NewChangeRecord,
    ) -> impl Future<Output = Result<ChangeRecord, AppError>> + Send;

    /// Undismissed changes, newest first, optionally filtered by domain.
    fn list_changes(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChangeRecord>, AppError>> + Send;

    /// Mark a change as acknowledged. Returns false if it did not exist
    /// or was already dismissed.
    fn dismiss_change(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// An analyzer for when no analysis collaborator is wired.
///
/// Every document scores 0 with empty findings, so change detection
/// falls back to content hashes alone.
#[derive(Debug, Clone, Default)]
pub struct NullAnalyzer;

impl Analyzer for NullAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<Analysis, AppError> {
        Ok(Analysis {
            score: 0,
            structured: serde_json::json!({}),
        })
    }
}

/// A change store that records nothing, for pipelines without change tracking.
#[derive(Debug, Clone, Default)]
pub struct NullChangeStore;

impl ChangeStore for NullChangeStore {
    async fn record_change(&self, change: &NewChangeRecord) -> Result<ChangeRecord, AppError> {
        Ok(ChangeRecord {
            id: Uuid::nil(),
            domain: change.domain.clone(),
            document_type: change.document_type,
            previous_version_id: change.previous_version_id,
            current_version_id: change.current_version_id,
            previous_score: change.previous_score,
            current_score: change.current_score,
            score_delta: change.score_delta(),
            previous_analysis: change.previous_analysis.clone(),
            summary: change.summary.clone(),
            detected_at: chrono::Utc::now(),
            dismissed_at: None,
        })
    }

    async fn list_changes(
        &self,
        _domain: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        Ok(vec![])
    }

    async fn dismiss_change(&self, _id: Uuid) -> Result<bool, AppError> {
        Ok(false)
    }
}
