//! Resilient acquisition of policy documents.
//!
//! [`FetchCascade::acquire`] works through increasingly desperate strategies,
//! strictly one at a time:
//!
//! 1. refuse authentication endpoints outright;
//! 2. fetch directly, rotating browser user-agents with per-UA retries
//!    (429 backoff, 5xx exponential backoff, 403 rotates immediately);
//! 3. undo locale redirects by probing English variants;
//! 4. reject login pages by fingerprint;
//! 5. try alternate URLs for the same document;
//! 6. fall back to a cache mirror, then an archive snapshot.
//!
//! Every network attempt goes through the shared [`RateLimiter`].

use std::time::Duration;

use crate::auth_wall;
use crate::error::AppError;
use crate::locale;
use crate::models::{FetchSource, FetchedDocument, HttpResponse};
use crate::rate_limit::{Clock, MAX_BACKOFF, RateLimiter, TokioClock};
use crate::strategies::{AlternateUrl, FallbackSource, closest_snapshot_url};
use crate::traits::{Acquirer, Transport, TransportRequest};

/// Primary user-agent plus at most four fallbacks.
pub const MAX_USER_AGENTS: usize = 5;

const DEFAULT_USER_AGENTS: [&str; MAX_USER_AGENTS] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

pub const DEFAULT_CACHE_MIRROR_BASE: &str = "https://webcache.googleusercontent.com/search?q=cache:";
pub const DEFAULT_ARCHIVE_AVAILABILITY_URL: &str = "https://archive.org/wayback/available";

/// Configuration for the fetch cascade.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Tried in order; only the first [`MAX_USER_AGENTS`] are used.
    pub user_agents: Vec<String>,
    /// Attempts per user-agent.
    pub max_retries: u32,
    /// Base delay after a 5xx or network failure, doubled per attempt.
    pub server_error_backoff: Duration,
    /// Per-request timeout for the target site.
    pub request_timeout: Duration,
    /// Per-request timeout for archival sources.
    pub archive_timeout: Duration,
    /// An alternate URL must return more than this many bytes.
    pub alternate_min_bytes: usize,
    /// An archived copy must have more than this many bytes after cleanup.
    pub archive_min_bytes: usize,
    pub alternates: Vec<AlternateUrl>,
    pub fallbacks: Vec<FallbackSource>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            max_retries: 3,
            server_error_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            archive_timeout: Duration::from_secs(10),
            alternate_min_bytes: 1000,
            archive_min_bytes: 500,
            alternates: AlternateUrl::DEFAULT_ORDER.to_vec(),
            fallbacks: vec![
                FallbackSource::CacheMirror {
                    base_url: DEFAULT_CACHE_MIRROR_BASE.to_string(),
                },
                FallbackSource::ArchiveSnapshot {
                    availability_url: DEFAULT_ARCHIVE_AVAILABILITY_URL.to_string(),
                },
            ],
        }
    }
}

impl CascadeConfig {
    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_archive_timeout(mut self, timeout: Duration) -> Self {
        self.archive_timeout = timeout;
        self
    }

    pub fn with_alternates(mut self, alternates: Vec<AlternateUrl>) -> Self {
        self.alternates = alternates;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<FallbackSource>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Delay before retry `attempt` (zero-based) after a 5xx.
    fn server_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.server_error_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Outcome of one network attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Status(u16),
    Failed(String),
}

/// One (URL, user-agent, outcome) tuple. Logged, never persisted.
#[derive(Debug, Clone)]
pub struct FetchAttempt<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

impl FetchAttempt<'_> {
    fn log(&self) {
        match &self.outcome {
            AttemptOutcome::Status(status) => tracing::debug!(
                url = %self.url,
                user_agent = %self.user_agent,
                attempt = self.attempt,
                status,
                "Fetch attempt"
            ),
            AttemptOutcome::Failed(error) => tracing::debug!(
                url = %self.url,
                user_agent = %self.user_agent,
                attempt = self.attempt,
                %error,
                "Fetch attempt failed"
            ),
        }
    }
}

/// Keep whichever error tells the user the most.
fn keep_most_informative(slot: &mut Option<AppError>, error: AppError) {
    let replace = match slot {
        Some(current) => error.informativeness() > current.informativeness(),
        None => true,
    };
    if replace {
        *slot = Some(error);
    }
}

fn default_content_type(body: &[u8]) -> String {
    if body.starts_with(b"%PDF") {
        "application/pdf".to_string()
    } else {
        "text/html".to_string()
    }
}

fn is_pdf(response: &HttpResponse) -> bool {
    response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"))
        || response.body.starts_with(b"%PDF")
}

/// Ordered, serial acquisition strategies over a [`Transport`].
#[derive(Clone)]
pub struct FetchCascade<T, C = TokioClock> {
    transport: T,
    limiter: RateLimiter<C>,
    config: CascadeConfig,
}

impl<T: Transport, C: Clock> FetchCascade<T, C> {
    pub fn new(transport: T, limiter: RateLimiter<C>, config: CascadeConfig) -> Self {
        Self {
            transport,
            limiter,
            config,
        }
    }

    pub fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Acquire a document, trying every strategy before giving up.
    pub async fn acquire(&self, url: &str) -> Result<FetchedDocument, AppError> {
        let mut cause = None;

        match self.fetch_direct(url).await {
            Ok(doc) => return Ok(doc),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => {
                tracing::info!(%url, error = %e, "Direct fetch failed, trying alternates");
                keep_most_informative(&mut cause, e);
            }
        }

        for strategy in &self.config.alternates {
            let Some(alternate) = strategy.apply(url) else {
                continue;
            };
            tracing::debug!(strategy = strategy.name(), url = %alternate, "Trying alternate URL");
            match self.fetch_direct(&alternate).await {
                Ok(mut doc) if doc.bytes.len() > self.config.alternate_min_bytes => {
                    tracing::info!(
                        strategy = strategy.name(),
                        url = %alternate,
                        bytes = doc.bytes.len(),
                        "Alternate URL succeeded"
                    );
                    doc.source = FetchSource::Alternate(strategy.name().to_string());
                    return Ok(doc);
                }
                Ok(doc) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        bytes = doc.bytes.len(),
                        "Alternate URL returned too little content"
                    );
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => keep_most_informative(&mut cause, e),
            }
        }

        for source in &self.config.fallbacks {
            match self.try_fallback(source, url).await {
                Ok(Some(doc)) => {
                    tracing::info!(
                        source = source.name(),
                        %url,
                        bytes = doc.bytes.len(),
                        "Recovered document from archival source"
                    );
                    return Ok(doc);
                }
                Ok(None) => {
                    tracing::info!(source = source.name(), %url, "No usable archived copy");
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), %url, error = %e, "Archival fallback failed");
                }
            }
        }

        Err(AppError::AllStrategiesExhausted {
            url: url.to_string(),
            cause: Box::new(cause.unwrap_or_else(|| {
                AppError::Generic("no strategy produced a document".to_string())
            })),
        })
    }

    /// Steps 1-4 for a single URL: blocklist, user-agent rotation, locale
    /// recovery, login fingerprinting.
    async fn fetch_direct(&self, url: &str) -> Result<FetchedDocument, AppError> {
        if let Some(pattern) = auth_wall::blocked_url_pattern(url) {
            return Err(AppError::AuthWallDetected {
                url: url.to_string(),
                reason: format!("blocklisted URL pattern '{pattern}'"),
            });
        }
        let domain = RateLimiter::<C>::domain_key(url)
            .ok_or_else(|| AppError::InvalidUrl(url.to_string()))?;

        let mut cause = None;
        for user_agent in self.config.user_agents.iter().take(MAX_USER_AGENTS) {
            match self.fetch_with_user_agent(url, &domain, user_agent).await {
                Ok(response) => {
                    return Ok(self.finish(url, &domain, user_agent, response).await);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    let rotate = e.is_user_agent_sensitive();
                    tracing::debug!(%url, %user_agent, error = %e, rotate, "User-agent exhausted");
                    keep_most_informative(&mut cause, e);
                    if !rotate {
                        break;
                    }
                }
            }
        }

        Err(cause.unwrap_or_else(|| AppError::ConfigError("no user agents configured".into())))
    }

    /// Per-UA retry loop. Returns the first 2xx response.
    async fn fetch_with_user_agent(
        &self,
        url: &str,
        domain: &str,
        user_agent: &str,
    ) -> Result<HttpResponse, AppError> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let has_next = attempt + 1 < attempts;
            self.limiter.await_turn(domain).await;

            let request = TransportRequest {
                url,
                user_agent,
                timeout: self.config.request_timeout,
            };
            let response = match self.transport.get(request).await {
                Ok(response) => response,
                Err(e) => {
                    FetchAttempt {
                        url,
                        user_agent,
                        attempt,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    }
                    .log();
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if has_next {
                        self.limiter
                            .clock()
                            .sleep(self.config.server_backoff(attempt))
                            .await;
                    }
                    continue;
                }
            };

            FetchAttempt {
                url,
                user_agent,
                attempt,
                outcome: AttemptOutcome::Status(response.status),
            }
            .log();

            if !is_pdf(&response) {
                if let Some(reason) = auth_wall::login_fingerprint(&response.body) {
                    return Err(AppError::AuthWallDetected {
                        url: response.final_url,
                        reason: reason.to_string(),
                    });
                }
            }

            if response.is_success() {
                return Ok(response);
            }
            match response.status {
                429 => {
                    self.limiter.report_rate_limited(
                        domain,
                        response.retry_after.as_deref(),
                        attempt,
                    );
                    last_error = Some(AppError::RateLimitExceeded);
                }
                401 | 403 => {
                    return Err(AppError::Forbidden {
                        status: response.status,
                        url: url.to_string(),
                    });
                }
                status @ 500..=599 => {
                    last_error = Some(AppError::ServerError {
                        status,
                        url: url.to_string(),
                    });
                    if has_next {
                        self.limiter
                            .clock()
                            .sleep(self.config.server_backoff(attempt))
                            .await;
                    }
                }
                status => {
                    return Err(AppError::HttpStatus {
                        status,
                        url: url.to_string(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or(AppError::RateLimitExceeded))
    }

    /// Turn a 2xx response into a document, undoing locale redirects.
    async fn finish(
        &self,
        requested_url: &str,
        domain: &str,
        user_agent: &str,
        response: HttpResponse,
    ) -> FetchedDocument {
        let mut response = response;

        if response.is_html() {
            if let Some(locale) = locale::locale_redirect(requested_url, &response.final_url) {
                tracing::info!(
                    url = %requested_url,
                    final_url = %response.final_url,
                    %locale,
                    "Locale redirect detected, probing English variants"
                );
                if let Some(english) = self
                    .recover_english(requested_url, domain, user_agent, &response.final_url)
                    .await
                {
                    response = english;
                }
            }
        }

        let content_type = response
            .content_type
            .clone()
            .unwrap_or_else(|| default_content_type(&response.body));

        tracing::info!(
            url = %requested_url,
            final_url = %response.final_url,
            bytes = response.body.len(),
            "Fetched document"
        );

        FetchedDocument {
            bytes: response.body,
            content_type,
            final_url: response.final_url,
            source: FetchSource::Direct,
        }
    }

    async fn recover_english(
        &self,
        requested_url: &str,
        domain: &str,
        user_agent: &str,
        localized_url: &str,
    ) -> Option<HttpResponse> {
        for variant in locale::english_variants(localized_url) {
            if variant == requested_url {
                continue;
            }
            self.limiter.await_turn(domain).await;
            let request = TransportRequest {
                url: &variant,
                user_agent,
                timeout: self.config.request_timeout,
            };
            match self.transport.get(request).await {
                Ok(response)
                    if response.is_success()
                        && locale::non_english_locale(&response.final_url).is_none()
                        && auth_wall::login_fingerprint(&response.body).is_none() =>
                {
                    tracing::info!(url = %variant, "English variant accepted");
                    return Some(response);
                }
                Ok(response) => {
                    tracing::debug!(
                        url = %variant,
                        status = response.status,
                        final_url = %response.final_url,
                        "English variant rejected"
                    );
                }
                Err(e) => {
                    tracing::debug!(url = %variant, error = %e, "English variant failed");
                }
            }
        }
        None
    }

    /// Single GET against an archival source with the primary user-agent.
    async fn fetch_archival(&self, url: &str) -> Result<HttpResponse, AppError> {
        let domain = RateLimiter::<C>::domain_key(url)
            .ok_or_else(|| AppError::InvalidUrl(url.to_string()))?;
        let user_agent = self
            .config
            .user_agents
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0]);

        self.limiter.await_turn(&domain).await;
        self.transport
            .get(TransportRequest {
                url,
                user_agent,
                timeout: self.config.archive_timeout,
            })
            .await
    }

    /// Try one archival source. `Ok(None)` means the source had nothing usable.
    async fn try_fallback(
        &self,
        source: &FallbackSource,
        url: &str,
    ) -> Result<Option<FetchedDocument>, AppError> {
        let (copy_url, fetch_source) = match source {
            FallbackSource::CacheMirror { base_url } => (
                FallbackSource::mirror_url(base_url, url),
                FetchSource::CacheMirror,
            ),
            FallbackSource::ArchiveSnapshot { availability_url } => {
                let Some(query) = FallbackSource::availability_query(availability_url, url) else {
                    return Ok(None);
                };
                let availability = self.fetch_archival(&query).await?;
                if !availability.is_success() {
                    return Ok(None);
                }
                let Some(snapshot) = closest_snapshot_url(&availability.body) else {
                    return Ok(None);
                };
                (snapshot, FetchSource::ArchiveSnapshot)
            }
        };

        let response = self.fetch_archival(&copy_url).await?;
        if !response.is_success() {
            tracing::debug!(
                source = source.name(),
                status = response.status,
                "Archival source returned non-success"
            );
            return Ok(None);
        }

        let (bytes, content_type) = if is_pdf(&response) {
            (response.body, "application/pdf".to_string())
        } else {
            let html = String::from_utf8_lossy(&response.body);
            (
                source.strip_injected_markup(&html).into_bytes(),
                "text/html".to_string(),
            )
        };

        if bytes.len() <= self.config.archive_min_bytes {
            tracing::debug!(
                source = source.name(),
                bytes = bytes.len(),
                "Archived copy too short"
            );
            return Ok(None);
        }

        Ok(Some(FetchedDocument {
            bytes,
            content_type,
            final_url: response.final_url,
            source: fetch_source,
        }))
    }
}

impl<T: Transport, C: Clock> Acquirer for FetchCascade<T, C> {
    async fn acquire(&self, url: &str) -> Result<FetchedDocument, AppError> {
        FetchCascade::acquire(self, url).await
    }
}
