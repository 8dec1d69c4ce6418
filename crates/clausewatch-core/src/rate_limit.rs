//! Per-domain request spacing and backoff for polite fetching.
//!
//! Every attempt made by the fetch cascade goes through
//! [`RateLimiter::await_turn`], which guarantees a minimum interval (plus
//! jitter) between requests to the same host, and honours any backoff set by
//! [`RateLimiter::report_rate_limited`] after an HTTP 429.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use clausewatch_core::rate_limit::{RateLimitConfig, RateLimiter};
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new(Duration::from_secs(1)).with_jitter(Duration::from_millis(500)),
//! );
//! limiter.await_turn("example.com").await;
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use url::Url;

/// Lower clamp for a parsed Retry-After value.
pub const MIN_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper clamp for Retry-After and for the resulting backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Source of time for the limiter and the cascade's sleeps.
pub trait Clock: Send + Sync + Clone {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Configuration for per-domain spacing.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub min_interval: Duration,

    /// Maximum random jitter added on top of `min_interval` (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl RateLimitConfig {
    /// Create a new config with the given interval and no jitter.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Compute the effective interval for a single wait (interval + random jitter).
    fn effective_interval(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.min_interval;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.min_interval + Duration::from_millis(jitter_ms)
    }
}

impl Default for RateLimitConfig {
    /// 1 second interval, 500ms jitter.
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// Politeness state for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRateState {
    pub domain: String,
    /// Time of the most recently granted (or reserved) request slot.
    pub last_request_at: Option<Instant>,
    /// No request may start before this instant.
    pub backoff_until: Option<Instant>,
}

impl DomainRateState {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            last_request_at: None,
            backoff_until: None,
        }
    }
}

/// Per-domain rate limiter.
///
/// Cloning yields a handle onto the same state, so one limiter can be shared
/// by every cascade in the process. Slots are reserved under the lock and
/// slept on outside it: concurrent callers for the same domain queue up one
/// interval apart instead of racing past the spacing check.
#[derive(Clone)]
pub struct RateLimiter<C = TokioClock> {
    config: RateLimitConfig,
    clock: C,
    state: Arc<Mutex<HashMap<String, DomainRateState>>>,
}

impl RateLimiter<TokioClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, TokioClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Extract the rate-limit key (lower-cased host) from a URL.
    pub fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        url.host_str().map(|h| h.to_ascii_lowercase())
    }

    fn lock_state(&self) -> MutexGuard<'_, HashMap<String, DomainRateState>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }

    /// Snapshot of a domain's state, if it has been seen.
    pub fn state(&self, domain: &str) -> Option<DomainRateState> {
        self.lock_state().get(domain).cloned()
    }

    /// Wait until this domain may be contacted again, then claim the slot.
    ///
    /// Returns how long the caller was delayed.
    pub async fn await_turn(&self, domain: &str) -> Duration {
        let wait = {
            let mut map = self.lock_state();
            let now = self.clock.now();
            let entry = map
                .entry(domain.to_string())
                .or_insert_with(|| DomainRateState::new(domain));

            let mut earliest = match entry.last_request_at {
                Some(last) => last + self.config.effective_interval(),
                None => now,
            };
            if let Some(until) = entry.backoff_until {
                earliest = earliest.max(until);
            }
            let slot = earliest.max(now);
            entry.last_request_at = Some(slot);
            slot - now
        };

        if !wait.is_zero() {
            tracing::debug!(
                domain = %domain,
                sleep_ms = %wait.as_millis(),
                "Throttling request"
            );
            self.clock.sleep(wait).await;
        }
        wait
    }

    /// Record an HTTP 429 for a domain and push its next slot back.
    ///
    /// `attempt` is the zero-based retry attempt on which the 429 was seen.
    /// Returns the backoff applied.
    pub fn report_rate_limited(
        &self,
        domain: &str,
        retry_after: Option<&str>,
        attempt: u32,
    ) -> Duration {
        let parsed = retry_after
            .and_then(|h| parse_retry_after(h, Utc::now()))
            .unwrap_or(MIN_RETRY_AFTER);
        let backoff = rate_limit_backoff(parsed, attempt);

        let mut map = self.lock_state();
        let now = self.clock.now();
        let entry = map
            .entry(domain.to_string())
            .or_insert_with(|| DomainRateState::new(domain));
        let until = now + backoff;
        entry.backoff_until = Some(entry.backoff_until.map_or(until, |b| b.max(until)));

        tracing::info!(
            domain = %domain,
            backoff_ms = %backoff.as_millis(),
            attempt,
            "Rate limited, backing off"
        );
        backoff
    }
}

/// Parse a Retry-After header (delta-seconds or HTTP-date), clamped to
/// [1s, 60s]. Returns `None` for unparseable values.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let raw = if let Ok(secs) = value.parse::<u64>() {
        Duration::from_secs(secs)
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?;
        let delta = date.with_timezone(&Utc) - now;
        delta.to_std().unwrap_or(Duration::ZERO)
    };
    Some(raw.clamp(MIN_RETRY_AFTER, MAX_BACKOFF))
}

/// Backoff after a 429: `retry_after * 2^attempt`, capped at 60s.
pub fn rate_limit_backoff(retry_after: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    retry_after.saturating_mul(factor).min(MAX_BACKOFF)
}

// ---------------------------------------------------------------------------
// Jitter without the `rand` crate: xorshift seeded from the clock.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
