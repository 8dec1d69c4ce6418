use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Analysis, ChangeRecord, DocumentType, NewChangeRecord, PolicyVersion};
use crate::summary::change_summary;
use crate::traits::{Acquirer, Analyzer, ChangeStore, ContentExtractor, VersionStore};
use crate::version_cache::VersionCache;

/// A (domain, document type) pair under periodic observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorTarget {
    pub domain: String,
    pub document_type: DocumentType,
}

impl MonitorTarget {
    pub fn new(domain: impl Into<String>, document_type: DocumentType) -> Self {
        Self {
            domain: domain.into(),
            document_type,
        }
    }
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.document_type)
    }
}

/// Parses `domain:type`, e.g. `example.com:privacy`.
impl FromStr for MonitorTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, document_type) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Expected domain:type, got '{s}'"))?;
        if domain.is_empty() {
            return Err(format!("Missing domain in '{s}'"));
        }
        Ok(Self::new(domain, document_type.parse()?))
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between full passes over the targets.
    pub interval: Duration,
    /// Delay between consecutive targets within a pass.
    pub inter_item_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            inter_item_delay: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }
}

/// Result of rechecking one target.
#[derive(Debug, Clone)]
pub struct RecheckOutcome {
    pub has_changes: bool,
    /// Id of the saved version; `None` when nothing changed.
    pub new_version_id: Option<Uuid>,
    pub change: Option<ChangeRecord>,
}

impl RecheckOutcome {
    fn unchanged() -> Self {
        Self {
            has_changes: false,
            new_version_id: None,
            change: None,
        }
    }
}

/// Events emitted by the monitor for logging.
#[derive(Debug, Clone)]
pub enum MonitorEvent<'a> {
    Started { targets: usize },
    CycleStarted { cycle: u64 },
    Checking { target: &'a MonitorTarget },
    Unchanged { target: &'a MonitorTarget },
    ChangeDetected { target: &'a MonitorTarget, change: &'a ChangeRecord },
    CheckFailed { target: &'a MonitorTarget, error: &'a str },
    CycleCompleted { cycle: u64, changed: usize, failed: usize },
    Stopped,
}

/// Receives monitor events (decoupled logging).
pub trait MonitorReporter: Send + Sync {
    fn report(&self, event: MonitorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitorReporter;

impl MonitorReporter for TracingMonitorReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        match event {
            MonitorEvent::Started { targets } => {
                tracing::info!(%targets, "Monitor started");
            }
            MonitorEvent::CycleStarted { cycle } => {
                tracing::info!(%cycle, "Recheck cycle started");
            }
            MonitorEvent::Checking { target } => {
                tracing::debug!(%target, "Rechecking");
            }
            MonitorEvent::Unchanged { target } => {
                tracing::info!(%target, "No changes");
            }
            MonitorEvent::ChangeDetected { target, change } => {
                tracing::info!(
                    %target,
                    change_id = %change.id,
                    score_delta = change.score_delta,
                    summary = %change.summary,
                    "Change detected"
                );
            }
            MonitorEvent::CheckFailed { target, error } => {
                tracing::warn!(%target, %error, "Recheck failed");
            }
            MonitorEvent::CycleCompleted {
                cycle,
                changed,
                failed,
            } => {
                tracing::info!(%cycle, %changed, %failed, "Recheck cycle completed");
            }
            MonitorEvent::Stopped => {
                tracing::info!("Monitor stopped");
            }
        }
    }
}

/// True when a fresh capture diverges from the stored version by content
/// hash or by score.
pub fn diverges(previous: &PolicyVersion, content_hash: &str, analysis: &Analysis) -> bool {
    previous.content_hash != content_hash || previous.score != analysis.score
}

/// The change record pairing `previous` with the newly saved version.
pub fn change_record(
    previous: &PolicyVersion,
    current_version_id: Uuid,
    content_hash: &str,
    analysis: &Analysis,
) -> NewChangeRecord {
    let text_changed = previous.content_hash != content_hash;
    NewChangeRecord {
        domain: previous.domain.clone(),
        document_type: previous.document_type,
        previous_version_id: previous.id,
        current_version_id,
        previous_score: previous.score,
        current_score: analysis.score,
        previous_analysis: previous.structured_analysis.clone(),
        summary: change_summary(
            previous.score,
            &previous.structured_analysis,
            analysis.score,
            &analysis.structured,
            text_changed,
        ),
    }
}

/// Periodically re-acquires tracked documents and records changes.
pub struct ChangeMonitor<A, E, S, N, C>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
    N: Analyzer,
    C: ChangeStore,
{
    cache: VersionCache<A, E, S>,
    analyzer: N,
    changes: C,
    config: MonitorConfig,
}

impl<A, E, S, N, C> ChangeMonitor<A, E, S, N, C>
where
    A: Acquirer,
    E: ContentExtractor,
    S: VersionStore,
    N: Analyzer,
    C: ChangeStore,
{
    pub fn new(cache: VersionCache<A, E, S>, analyzer: N, changes: C, config: MonitorConfig) -> Self {
        Self {
            cache,
            analyzer,
            changes,
            config,
        }
    }

    /// Force a live capture of the last stored version's URL and compare.
    ///
    /// Writes nothing unless the content hash or the score changed.
    pub async fn recheck(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> Result<RecheckOutcome, AppError> {
        let previous = self
            .cache
            .store()
            .get_latest_version(domain, document_type)
            .await?
            .ok_or_else(|| AppError::NoBaseline {
                domain: domain.to_string(),
                document_type: document_type.to_string(),
            })?;

        let capture = self.cache.capture(&previous.source_url).await?;
        let analysis = self
            .analyzer
            .analyze(&capture.document.normalized_text)
            .await?;

        if !diverges(&previous, &capture.content_hash, &analysis) {
            tracing::debug!(%domain, %document_type, "Recheck found no changes");
            return Ok(RecheckOutcome::unchanged());
        }

        let new_version_id = self
            .cache
            .save_capture(
                domain,
                document_type,
                &capture,
                analysis.structured.clone(),
                analysis.score,
            )
            .await?;

        let record = change_record(&previous, new_version_id, &capture.content_hash, &analysis);
        let change = self.changes.record_change(&record).await?;

        tracing::info!(
            %domain,
            %document_type,
            change_id = %change.id,
            score_delta = change.score_delta,
            "Recorded change"
        );

        Ok(RecheckOutcome {
            has_changes: true,
            new_version_id: Some(new_version_id),
            change: Some(change),
        })
    }

    /// Recheck targets one after another with a fixed delay between them.
    /// A failing target is reported and the batch continues.
    pub async fn recheck_all<R: MonitorReporter>(
        &self,
        targets: &[MonitorTarget],
        reporter: &R,
    ) -> Vec<(MonitorTarget, Result<RecheckOutcome, AppError>)> {
        self.recheck_batch(targets, reporter, None).await
    }

    async fn recheck_batch<R: MonitorReporter>(
        &self,
        targets: &[MonitorTarget],
        reporter: &R,
        cancel_token: Option<&CancellationToken>,
    ) -> Vec<(MonitorTarget, Result<RecheckOutcome, AppError>)> {
        let mut results = Vec::with_capacity(targets.len());

        for (i, target) in targets.iter().enumerate() {
            if i > 0 && !self.config.inter_item_delay.is_zero() {
                match cancel_token {
                    Some(token) => {
                        tokio::select! {
                            () = tokio::time::sleep(self.config.inter_item_delay) => {}
                            () = token.cancelled() => break,
                        }
                    }
                    None => tokio::time::sleep(self.config.inter_item_delay).await,
                }
            }

            reporter.report(MonitorEvent::Checking { target });
            let result = self.recheck(&target.domain, target.document_type).await;
            match &result {
                Ok(RecheckOutcome {
                    change: Some(change),
                    ..
                }) => reporter.report(MonitorEvent::ChangeDetected { target, change }),
                Ok(_) => reporter.report(MonitorEvent::Unchanged { target }),
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(MonitorEvent::CheckFailed {
                        target,
                        error: &error,
                    });
                }
            }
            results.push((target.clone(), result));
        }

        results
    }

    /// Recheck all targets every `interval` until cancelled.
    pub async fn run<R: MonitorReporter>(
        &self,
        targets: &[MonitorTarget],
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(MonitorEvent::Started {
            targets: targets.len(),
        });

        let mut cycle = 0u64;
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            cycle += 1;
            reporter.report(MonitorEvent::CycleStarted { cycle });

            let results = self
                .recheck_batch(targets, reporter, Some(&cancel_token))
                .await;
            let changed = results
                .iter()
                .filter(|(_, r)| r.as_ref().is_ok_and(|o| o.has_changes))
                .count();
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            reporter.report(MonitorEvent::CycleCompleted {
                cycle,
                changed,
                failed,
            });

            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        reporter.report(MonitorEvent::Stopped);
        Ok(())
    }

    pub async fn list_changes(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        self.changes.list_changes(domain, limit).await
    }

    /// Acknowledge a change. Returns false if it was unknown or already dismissed.
    pub async fn dismiss(&self, change_id: Uuid) -> Result<bool, AppError> {
        let dismissed = self.changes.dismiss_change(change_id).await?;
        tracing::info!(%change_id, dismissed, "Dismiss change");
        Ok(dismissed)
    }
}
