use crate::error::AppError;
use crate::models::{ChangeRecord, DocumentType, PolicyVersion, content_hash};
use crate::monitor::{change_record, diverges};
use crate::traits::{Acquirer, Analyzer, ChangeStore, ContentExtractor, VersionStore};
use crate::validation;
use crate::version_cache::{Freshness, VersionCache};

/// Result of [`PolicyPipeline::get_document`].
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub version: PolicyVersion,
    /// Served from the store without a new analysis.
    pub from_cache: bool,
    /// Content hash or score differs from the previous latest version
    /// (always true for a first capture).
    pub changed: bool,
    /// Recorded change, when change tracking is enabled.
    pub change: Option<ChangeRecord>,
}

/// Orchestrates the caller-facing flow: check cache → acquire → extract →
/// hash → analyze → save → (optionally) record change.
///
/// Generic over all external dependencies via traits, so tests run without
/// network, analysis service or database.
pub struct PolicyPipeline<A, E, S, N, C>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
    N: Analyzer,
    C: ChangeStore,
{
    cache: VersionCache<A, E, S>,
    analyzer: N,
    changes: Option<C>,
}

impl<A, E, S, N, C> PolicyPipeline<A, E, S, N, C>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
    N: Analyzer,
    C: ChangeStore,
{
    /// Pipeline without change tracking.
    pub fn new(cache: VersionCache<A, E, S>, analyzer: N) -> Self {
        Self {
            cache,
            analyzer,
            changes: None,
        }
    }

    /// Pipeline that records a [`ChangeRecord`] whenever a save diverges
    /// from the previous latest version.
    pub fn with_change_tracking(cache: VersionCache<A, E, S>, analyzer: N, changes: C) -> Self {
        Self {
            cache,
            analyzer,
            changes: Some(changes),
        }
    }

    pub fn cache(&self) -> &VersionCache<A, E, S> {
        &self.cache
    }

    /// Return the current version of a document, re-acquiring only when the
    /// cache cannot vouch for the stored one.
    pub async fn get_document(
        &self,
        domain: &str,
        document_type: DocumentType,
        url: &str,
    ) -> Result<PipelineResult, AppError> {
        let status = self.cache.check_cache(domain, document_type).await?;

        if let Some(version) = status.version {
            if status.is_up_to_date {
                tracing::info!(%domain, %document_type, version_id = %version.id, "Serving cached version");
                return Ok(PipelineResult {
                    version,
                    from_cache: true,
                    changed: false,
                    change: None,
                });
            }
            if let Freshness::RevalidationFailed(reason) = &status.freshness {
                tracing::warn!(%domain, %document_type, %reason, "Serving stale version");
                return Ok(PipelineResult {
                    version,
                    from_cache: true,
                    changed: false,
                    change: None,
                });
            }

            let capture = match status.fresh_capture {
                Some(capture) => capture,
                None => self.cache.capture(url).await?,
            };
            return self
                .analyze_and_save(
                    domain,
                    document_type,
                    &capture.url,
                    &capture.document.normalized_text,
                    &capture.content_hash,
                    Some(version),
                )
                .await;
        }

        let capture = self.cache.capture(url).await?;
        self.analyze_and_save(
            domain,
            document_type,
            &capture.url,
            &capture.document.normalized_text,
            &capture.content_hash,
            None,
        )
        .await
    }

    /// Store manually supplied text (e.g. pasted by a user after the site
    /// blocked acquisition). The text must pass the same gates as extracted
    /// content.
    pub async fn ingest_text(
        &self,
        domain: &str,
        document_type: DocumentType,
        url: &str,
        text: &str,
    ) -> Result<PipelineResult, AppError> {
        validation::validate(text, url)?;
        let previous = self
            .cache
            .store()
            .get_latest_version(domain, document_type)
            .await?;
        let hash = content_hash(text);
        self.analyze_and_save(domain, document_type, url, text, &hash, previous)
            .await
    }

    async fn analyze_and_save(
        &self,
        domain: &str,
        document_type: DocumentType,
        url: &str,
        text: &str,
        hash: &str,
        previous: Option<PolicyVersion>,
    ) -> Result<PipelineResult, AppError> {
        let analysis = self.analyzer.analyze(text).await?;
        let version_id = self
            .cache
            .save_version(
                domain,
                document_type,
                url,
                text,
                analysis.structured.clone(),
                analysis.score,
            )
            .await?;
        let version = self.cache.get_version_by_id(version_id).await?;

        let changed = previous
            .as_ref()
            .is_none_or(|p| diverges(p, hash, &analysis));

        let change = match (&self.changes, &previous) {
            (Some(changes), Some(previous)) if changed => {
                let record = change_record(previous, version_id, hash, &analysis);
                let change = changes.record_change(&record).await?;
                tracing::info!(%domain, %document_type, change_id = %change.id, "Recorded change");
                Some(change)
            }
            _ => None,
        };

        Ok(PipelineResult {
            version,
            from_cache: false,
            changed,
            change,
        })
    }
}
