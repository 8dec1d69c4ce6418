use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    DocumentType, ExtractedDocument, FetchSource, MAX_NORMALIZED_TEXT_BYTES, NewPolicyVersion,
    PolicyVersion, cap_text, content_hash, word_count,
};
use crate::traits::{Acquirer, ContentExtractor, VersionStore};

/// Stored versions younger than this are served without any network access.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A version analyzed at `analyzed_at` is fresh while strictly younger than `ttl`.
fn within_ttl(analyzed_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match TimeDelta::from_std(ttl) {
        Ok(ttl) => now - analyzed_at < ttl,
        Err(_) => true,
    }
}

/// Configuration for the version cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A freshly acquired and extracted document, hashed but not yet stored.
#[derive(Debug, Clone)]
pub struct Capture {
    pub url: String,
    pub final_url: String,
    pub source: FetchSource,
    pub document: ExtractedDocument,
    pub content_hash: String,
}

/// How `check_cache` reached its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing stored yet.
    Missing,
    /// Stored version is younger than the TTL; no network access.
    WithinTtl,
    /// Stored version was older than the TTL but a live capture hashed the
    /// same. Its `analyzed_at` is refreshed.
    Revalidated,
    /// A live capture hashed differently.
    Changed,
    /// The live capture failed; the stored version is all we have.
    RevalidationFailed(String),
}

/// Result of a cache check.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub is_cached: bool,
    pub is_up_to_date: bool,
    pub version: Option<PolicyVersion>,
    pub freshness: Freshness,
    /// Set when revalidation found different content, so the caller can
    /// analyze and save it without acquiring again.
    pub fresh_capture: Option<Capture>,
}

impl CacheStatus {
    fn missing() -> Self {
        Self {
            is_cached: false,
            is_up_to_date: false,
            version: None,
            freshness: Freshness::Missing,
            fresh_capture: None,
        }
    }
}

/// Content-addressed, TTL-checked cache over a [`VersionStore`].
#[derive(Clone)]
pub struct VersionCache<A, E, S>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
{
    acquirer: A,
    extractor: E,
    store: S,
    config: CacheConfig,
}

impl<A, E, S> VersionCache<A, E, S>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
{
    pub fn new(acquirer: A, extractor: E, store: S, config: CacheConfig) -> Self {
        Self {
            acquirer,
            extractor,
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Acquire, extract and hash a URL.
    pub async fn capture(&self, url: &str) -> Result<Capture, AppError> {
        let fetched = self.acquirer.acquire(url).await?;
        let document = self
            .extractor
            .extract(&fetched.bytes, &fetched.content_type, url)?;
        let hash = content_hash(&document.normalized_text);

        tracing::info!(
            %url,
            source = %fetched.source,
            chars = document.length,
            content_hash = %&hash[..8],
            "Captured document"
        );

        Ok(Capture {
            url: url.to_string(),
            final_url: fetched.final_url,
            source: fetched.source,
            document,
            content_hash: hash,
        })
    }

    fn is_within_ttl(&self, version: &PolicyVersion) -> bool {
        within_ttl(version.analyzed_at, Utc::now(), self.config.ttl)
    }

    /// Bump `analyzed_at` on a stored version whose content was just confirmed.
    async fn touch(&self, version: PolicyVersion) -> PolicyVersion {
        let refreshed = NewPolicyVersion {
            domain: version.domain.clone(),
            document_type: version.document_type,
            source_url: version.source_url.clone(),
            content_hash: version.content_hash.clone(),
            normalized_text: version.normalized_text.clone(),
            structured_analysis: version.structured_analysis.clone(),
            score: version.score,
            word_count: version.word_count,
            analyzed_at: Utc::now(),
        };
        match self.store.upsert_version(&refreshed).await {
            Ok(_) => PolicyVersion {
                analyzed_at: refreshed.analyzed_at,
                ..version
            },
            Err(e) => {
                tracing::warn!(version_id = %version.id, error = %e, "Failed to refresh revalidated version");
                version
            }
        }
    }

    /// Decide whether the stored version for (domain, type) can be served.
    pub async fn check_cache(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> Result<CacheStatus, AppError> {
        let Some(version) = self.store.get_latest_version(domain, document_type).await? else {
            tracing::debug!(%domain, %document_type, "No cached version");
            return Ok(CacheStatus::missing());
        };

        if self.is_within_ttl(&version) {
            tracing::debug!(%domain, %document_type, version_id = %version.id, "Cache hit within TTL");
            return Ok(CacheStatus {
                is_cached: true,
                is_up_to_date: true,
                version: Some(version),
                freshness: Freshness::WithinTtl,
                fresh_capture: None,
            });
        }

        match self.capture(&version.source_url).await {
            Ok(capture) if capture.content_hash == version.content_hash => {
                tracing::info!(%domain, %document_type, "Stale cache revalidated, content unchanged");
                let version = self.touch(version).await;
                Ok(CacheStatus {
                    is_cached: true,
                    is_up_to_date: true,
                    version: Some(version),
                    freshness: Freshness::Revalidated,
                    fresh_capture: None,
                })
            }
            Ok(capture) => {
                tracing::info!(
                    %domain,
                    %document_type,
                    old_hash = %&version.content_hash[..8.min(version.content_hash.len())],
                    new_hash = %&capture.content_hash[..8],
                    "Stale cache, content changed"
                );
                Ok(CacheStatus {
                    is_cached: true,
                    is_up_to_date: false,
                    version: Some(version),
                    freshness: Freshness::Changed,
                    fresh_capture: Some(capture),
                })
            }
            Err(e) => {
                tracing::warn!(%domain, %document_type, error = %e, "Revalidation failed, serving stale version");
                Ok(CacheStatus {
                    is_cached: true,
                    is_up_to_date: false,
                    version: Some(version),
                    freshness: Freshness::RevalidationFailed(e.to_string()),
                    fresh_capture: None,
                })
            }
        }
    }

    /// Hash, cap and upsert a version. Identical content (after hash
    /// normalization) returns the existing row's id.
    pub async fn save_version(
        &self,
        domain: &str,
        document_type: DocumentType,
        url: &str,
        text: &str,
        structured_analysis: serde_json::Value,
        score: i32,
    ) -> Result<Uuid, AppError> {
        let hash = content_hash(text);
        self.save_hashed(domain, document_type, url, text, hash, structured_analysis, score)
            .await
    }

    /// Save a capture without rehashing its text.
    pub async fn save_capture(
        &self,
        domain: &str,
        document_type: DocumentType,
        capture: &Capture,
        structured_analysis: serde_json::Value,
        score: i32,
    ) -> Result<Uuid, AppError> {
        self.save_hashed(
            domain,
            document_type,
            &capture.url,
            &capture.document.normalized_text,
            capture.content_hash.clone(),
            structured_analysis,
            score,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn save_hashed(
        &self,
        domain: &str,
        document_type: DocumentType,
        url: &str,
        text: &str,
        hash: String,
        structured_analysis: serde_json::Value,
        score: i32,
    ) -> Result<Uuid, AppError> {
        let stored = cap_text(text, MAX_NORMALIZED_TEXT_BYTES);
        if stored.len() < text.len() {
            tracing::debug!(%domain, original = text.len(), stored = stored.len(), "Capped stored text");
        }

        let version = NewPolicyVersion {
            domain: domain.to_string(),
            document_type,
            source_url: url.to_string(),
            content_hash: hash,
            normalized_text: stored.to_string(),
            structured_analysis,
            score,
            word_count: word_count(text),
            analyzed_at: Utc::now(),
        };

        let id = self.store.upsert_version(&version).await?;
        tracing::info!(
            %domain,
            %document_type,
            version_id = %id,
            content_hash = %&version.content_hash[..8],
            score,
            "Saved version"
        );
        Ok(id)
    }

    pub async fn list_versions(
        &self,
        domain: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<PolicyVersion>, AppError> {
        self.store.list_versions(domain, document_type, limit).await
    }

    pub async fn get_version_by_id(&self, id: Uuid) -> Result<PolicyVersion, AppError> {
        self.store
            .get_version_by_id(id)
            .await?
            .ok_or_else(|| AppError::VersionNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    const DOMAIN: &str = "example.com";
    const URL: &str = "https://example.com/privacy";
    const TEXT: &str = "Privacy Policy\n\nWe collect your email address.";

    fn cache(acquirer: &MockAcquirer, store: &MockStore) -> VersionCache<MockAcquirer, MockExtractor, MockStore> {
        VersionCache::new(
            acquirer.clone(),
            MockExtractor::passthrough(),
            store.clone(),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn missing_version_reports_not_cached() {
        let acquirer = MockAcquirer::new(TEXT);
        let store = MockStore::empty();

        let status = cache(&acquirer, &store)
            .check_cache(DOMAIN, DocumentType::Privacy)
            .await
            .unwrap();

        assert!(!status.is_cached);
        assert!(!status.is_up_to_date);
        assert_eq!(status.freshness, Freshness::Missing);
        assert_eq!(acquirer.call_count(), 0);
    }

    #[tokio::test]
    async fn version_within_ttl_skips_network() {
        let acquirer = MockAcquirer::new(TEXT);
        let store = MockStore::with_versions(vec![make_test_version(TEXT, TimeDelta::days(1))]);

        let status = cache(&acquirer, &store)
            .check_cache(DOMAIN, DocumentType::Privacy)
            .await
            .unwrap();

        assert!(status.is_cached);
        assert!(status.is_up_to_date);
        assert_eq!(status.freshness, Freshness::WithinTtl);
        assert_eq!(acquirer.call_count(), 0);
    }

    #[tokio::test]
    async fn stale_version_with_same_content_is_revalidated() {
        // Differs only in case and whitespace.
        let acquirer = MockAcquirer::new("PRIVACY POLICY   We collect your email address.");
        let store = MockStore::with_versions(vec![make_test_version(TEXT, TimeDelta::days(30))]);

        let status = cache(&acquirer, &store)
            .check_cache(DOMAIN, DocumentType::Privacy)
            .await
            .unwrap();

        assert!(status.is_up_to_date);
        assert_eq!(status.freshness, Freshness::Revalidated);
        assert_eq!(acquirer.calls(), vec![URL.to_string()]);
    }

    #[tokio::test]
    async fn revalidation_restarts_the_ttl() {
        let acquirer = MockAcquirer::new(TEXT);
        let stored = make_test_version(TEXT, TimeDelta::days(30));
        let store = MockStore::with_versions(vec![stored.clone()]);
        let cache = cache(&acquirer, &store);

        let first = cache.check_cache(DOMAIN, DocumentType::Privacy).await.unwrap();
        let second = cache.check_cache(DOMAIN, DocumentType::Privacy).await.unwrap();

        assert_eq!(first.freshness, Freshness::Revalidated);
        assert!(first.version.unwrap().analyzed_at > stored.analyzed_at);
        assert_eq!(second.freshness, Freshness::WithinTtl);
        assert_eq!(acquirer.call_count(), 1);
        let versions = store.versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, stored.id);
        assert_eq!(versions[0].score, stored.score);
    }

    #[test]
    fn ttl_boundary_is_stale() {
        let analyzed_at = Utc::now();
        let ttl = Duration::from_secs(60);

        assert!(within_ttl(analyzed_at, analyzed_at + TimeDelta::seconds(59), ttl));
        assert!(!within_ttl(analyzed_at, analyzed_at + TimeDelta::seconds(60), ttl));
        assert!(!within_ttl(analyzed_at, analyzed_at + TimeDelta::seconds(61), ttl));
    }

    #[tokio::test]
    async fn stale_version_with_new_content_returns_capture() {
        let acquirer = MockAcquirer::new("Privacy Policy\n\nWe now sell your email address.");
        let stored = make_test_version(TEXT, TimeDelta::days(30));
        let store = MockStore::with_versions(vec![stored.clone()]);

        let status = cache(&acquirer, &store)
            .check_cache(DOMAIN, DocumentType::Privacy)
            .await
            .unwrap();

        assert!(status.is_cached);
        assert!(!status.is_up_to_date);
        assert_eq!(status.freshness, Freshness::Changed);
        assert_eq!(status.version.unwrap().id, stored.id);
        let capture = status.fresh_capture.unwrap();
        assert_ne!(capture.content_hash, stored.content_hash);
    }

    #[tokio::test]
    async fn failed_revalidation_serves_stale_version() {
        let acquirer = MockAcquirer::with_error(AppError::NetworkError("connection reset".into()));
        let store = MockStore::with_versions(vec![make_test_version(TEXT, TimeDelta::days(30))]);

        let status = cache(&acquirer, &store)
            .check_cache(DOMAIN, DocumentType::Privacy)
            .await
            .unwrap();

        assert!(status.is_cached);
        assert!(!status.is_up_to_date);
        assert!(status.version.is_some());
        assert!(matches!(status.freshness, Freshness::RevalidationFailed(_)));
    }

    #[tokio::test]
    async fn saving_identical_content_is_idempotent() {
        let store = MockStore::empty();
        let cache = cache(&MockAcquirer::new(TEXT), &store);

        let first = cache
            .save_version(DOMAIN, DocumentType::Privacy, URL, TEXT, serde_json::json!({}), 70)
            .await
            .unwrap();
        let second = cache
            .save_version(
                DOMAIN,
                DocumentType::Privacy,
                URL,
                "  privacy policy We COLLECT your email address. ",
                serde_json::json!({"findings": []}),
                65,
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        let versions = store.versions();
        assert_eq!(versions.len(), 1);
        // The conflict refreshes the analysis fields.
        assert_eq!(versions[0].score, 65);
    }

    #[tokio::test]
    async fn different_content_creates_new_version() {
        let store = MockStore::empty();
        let cache = cache(&MockAcquirer::new(TEXT), &store);

        let first = cache
            .save_version(DOMAIN, DocumentType::Privacy, URL, TEXT, serde_json::json!({}), 70)
            .await
            .unwrap();
        let second = cache
            .save_version(
                DOMAIN,
                DocumentType::Privacy,
                URL,
                "We collect your phone number.",
                serde_json::json!({}),
                70,
            )
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.versions().len(), 2);
    }

    #[tokio::test]
    async fn oversized_text_is_capped_but_hashed_in_full() {
        let store = MockStore::empty();
        let cache = cache(&MockAcquirer::new(TEXT), &store);
        let text = "é".repeat(MAX_NORMALIZED_TEXT_BYTES);

        cache
            .save_version(DOMAIN, DocumentType::Privacy, URL, &text, serde_json::json!({}), 0)
            .await
            .unwrap();

        let saved = &store.versions()[0];
        assert!(saved.normalized_text.len() <= MAX_NORMALIZED_TEXT_BYTES);
        assert_eq!(saved.content_hash, content_hash(&text));
    }

    #[tokio::test]
    async fn unknown_version_id_is_not_found() {
        let cache = cache(&MockAcquirer::new(TEXT), &MockStore::empty());
        let err = cache.get_version_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::VersionNotFound(_)));
    }

    #[tokio::test]
    async fn list_versions_is_newest_first() {
        let older = make_test_version("We collect A.", TimeDelta::days(10));
        let newer = make_test_version("We collect B.", TimeDelta::days(1));
        let store = MockStore::with_versions(vec![older.clone(), newer.clone()]);
        let cache = cache(&MockAcquirer::new(TEXT), &store);

        let versions = cache
            .list_versions(DOMAIN, DocumentType::Privacy, 10)
            .await
            .unwrap();

        let ids: Vec<_> = versions.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
