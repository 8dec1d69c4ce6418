//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Analysis, ChangeRecord, DocumentType, ExtractedDocument, FetchSource, FetchedDocument,
    HttpResponse, NewChangeRecord, NewPolicyVersion, PolicyVersion, content_hash, word_count,
};
use crate::monitor::{MonitorEvent, MonitorReporter};
use crate::rate_limit::Clock;
use crate::traits::{
    Acquirer, Analyzer, ChangeStore, ContentExtractor, Transport, TransportRequest, VersionStore,
};

// ---------------------------------------------------------------------------
// MockClock
// ---------------------------------------------------------------------------

/// Manually driven clock. `sleep` advances time instantly.
#[derive(Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// One request seen by [`MockTransport`], stamped with the mock clock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum DefaultReply {
    Status(u16),
    Error(String),
}

/// Transport routed by exact URL.
///
/// Each route holds a queue of responses: calls pop from the front until one
/// remains, which is then repeated. Unrouted URLs get the default reply
/// (404 unless configured).
#[derive(Clone)]
pub struct MockTransport {
    clock: MockClock,
    routes: Arc<Mutex<HashMap<String, Vec<HttpResponse>>>>,
    default: Arc<Mutex<DefaultReply>>,
    calls: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            routes: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(Mutex::new(DefaultReply::Status(404))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_default_status(self, status: u16) -> Self {
        *self.default.lock().unwrap() = DefaultReply::Status(status);
        self
    }

    /// Unrouted URLs fail with a network error.
    pub fn with_default_error(self, message: &str) -> Self {
        *self.default.lock().unwrap() = DefaultReply::Error(message.to_string());
        self
    }

    pub fn route(&self, url: &str, responses: Vec<HttpResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), responses);
    }

    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn get(&self, request: TransportRequest<'_>) -> Result<HttpResponse, AppError> {
        self.calls.lock().unwrap().push(RecordedRequest {
            url: request.url.to_string(),
            user_agent: request.user_agent.to_string(),
            timeout: request.timeout,
            at: self.clock.now(),
        });

        let mut routes = self.routes.lock().unwrap();
        if let Some(queue) = routes.get_mut(request.url) {
            if queue.len() > 1 {
                return Ok(queue.remove(0));
            }
            if let Some(last) = queue.first() {
                return Ok(last.clone());
            }
        }

        match &*self.default.lock().unwrap() {
            DefaultReply::Status(status) => Ok(html_response(request.url, *status, "")),
            DefaultReply::Error(message) => Err(AppError::NetworkError(message.clone())),
        }
    }
}

/// An HTML response whose final URL is `final_url`.
pub fn html_response(final_url: &str, status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        final_url: final_url.to_string(),
        content_type: Some("text/html; charset=utf-8".to_string()),
        retry_after: None,
        body: body.as_bytes().to_vec(),
    }
}

// ---------------------------------------------------------------------------
// MockAcquirer
// ---------------------------------------------------------------------------

/// Acquirer returning plain text documents.
#[derive(Clone)]
pub struct MockAcquirer {
    /// Each call pops the first element; when empty, `text` is returned.
    responses: Arc<Mutex<Vec<Result<FetchedDocument, AppError>>>>,
    text: Arc<Mutex<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockAcquirer {
    pub fn new(text: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            text: Arc::new(Mutex::new(text.to_string())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        let acquirer = Self::new("");
        acquirer.responses.lock().unwrap().push(Err(error));
        acquirer
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Acquirer for MockAcquirer {
    async fn acquire(&self, url: &str) -> Result<FetchedDocument, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        Ok(FetchedDocument {
            bytes: self.text.lock().unwrap().as_bytes().to_vec(),
            content_type: "text/plain".to_string(),
            final_url: url.to_string(),
            source: FetchSource::Direct,
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor that treats the bytes as the normalized text.
#[derive(Clone)]
pub struct MockExtractor {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl ContentExtractor for MockExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        _content_type: &str,
        _url: &str,
    ) -> Result<ExtractedDocument, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(ExtractedDocument::new(
            "Test Policy",
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockAnalyzer {
    analysis: Arc<Mutex<Analysis>>,
    error: Arc<Mutex<Option<AppError>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockAnalyzer {
    pub fn new(analysis: Analysis) -> Self {
        Self {
            analysis: Arc::new(Mutex::new(analysis)),
            error: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Fixed score, empty findings.
    pub fn scoring(score: i32) -> Self {
        Self::new(Analysis {
            score,
            structured: serde_json::json!({"findings": []}),
        })
    }

    pub fn with_error(error: AppError) -> Self {
        let analyzer = Self::scoring(0);
        *analyzer.error.lock().unwrap() = Some(error);
        analyzer
    }

    pub fn set_analysis(&self, analysis: Analysis) {
        *self.analysis.lock().unwrap() = analysis;
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<Analysis, AppError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.analysis.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory version store with the same upsert semantics as the database.
#[derive(Clone)]
pub struct MockStore {
    versions: Arc<Mutex<Vec<PolicyVersion>>>,
    upserts: Arc<Mutex<usize>>,
    upsert_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::with_versions(Vec::new())
    }

    pub fn with_versions(versions: Vec<PolicyVersion>) -> Self {
        Self {
            versions: Arc::new(Mutex::new(versions)),
            upserts: Arc::new(Mutex::new(0)),
            upsert_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_upsert_error(error: AppError) -> Self {
        let store = Self::empty();
        *store.upsert_error.lock().unwrap() = Some(error);
        store
    }

    pub fn versions(&self) -> Vec<PolicyVersion> {
        self.versions.lock().unwrap().clone()
    }

    pub fn upsert_count(&self) -> usize {
        *self.upserts.lock().unwrap()
    }
}

impl VersionStore for MockStore {
    async fn get_latest_version(
        &self,
        domain: &str,
        document_type: DocumentType,
    ) -> Result<Option<PolicyVersion>, AppError> {
        let versions = self.versions.lock().unwrap();
        Ok(versions
            .iter()
            .filter(|v| v.domain == domain && v.document_type == document_type)
            .max_by_key(|v| v.analyzed_at)
            .cloned())
    }

    async fn upsert_version(&self, version: &NewPolicyVersion) -> Result<Uuid, AppError> {
        if let Some(e) = self.upsert_error.lock().unwrap().take() {
            return Err(e);
        }
        *self.upserts.lock().unwrap() += 1;

        let mut versions = self.versions.lock().unwrap();
        if let Some(existing) = versions.iter_mut().find(|v| {
            v.domain == version.domain
                && v.document_type == version.document_type
                && v.content_hash == version.content_hash
        }) {
            existing.source_url = version.source_url.clone();
            existing.structured_analysis = version.structured_analysis.clone();
            existing.score = version.score;
            existing.analyzed_at = version.analyzed_at;
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        versions.push(PolicyVersion {
            id,
            domain: version.domain.clone(),
            document_type: version.document_type,
            source_url: version.source_url.clone(),
            content_hash: version.content_hash.clone(),
            normalized_text: version.normalized_text.clone(),
            structured_analysis: version.structured_analysis.clone(),
            score: version.score,
            word_count: version.word_count,
            analyzed_at: version.analyzed_at,
        });
        Ok(id)
    }

    async fn list_versions(
        &self,
        domain: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<PolicyVersion>, AppError> {
        let mut matching: Vec<_> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.domain == domain && v.document_type == document_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_version_by_id(&self, id: Uuid) -> Result<Option<PolicyVersion>, AppError> {
        let versions = self.versions.lock().unwrap();
        Ok(versions.iter().find(|v| v.id == id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockChangeStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockChangeStore {
    records: Arc<Mutex<Vec<ChangeRecord>>>,
}

impl MockChangeStore {
    pub fn empty() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ChangeStore for MockChangeStore {
    async fn record_change(&self, change: &NewChangeRecord) -> Result<ChangeRecord, AppError> {
        let record = ChangeRecord {
            id: Uuid::new_v4(),
            domain: change.domain.clone(),
            document_type: change.document_type,
            previous_version_id: change.previous_version_id,
            current_version_id: change.current_version_id,
            previous_score: change.previous_score,
            current_score: change.current_score,
            score_delta: change.score_delta(),
            previous_analysis: change.previous_analysis.clone(),
            summary: change.summary.clone(),
            detected_at: Utc::now(),
            dismissed_at: None,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_changes(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        let mut matching: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.dismissed_at.is_none())
            .filter(|r| domain.is_none_or(|d| r.domain == d))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn dismiss_change(&self, id: Uuid) -> Result<bool, AppError> {
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.dismissed_at.is_none())
        {
            Some(record) => {
                record.dismissed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock monitor reporter that records event names.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl MonitorReporter for MockReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        let label = match &event {
            MonitorEvent::Started { .. } => "Started",
            MonitorEvent::CycleStarted { .. } => "CycleStarted",
            MonitorEvent::Checking { .. } => "Checking",
            MonitorEvent::Unchanged { .. } => "Unchanged",
            MonitorEvent::ChangeDetected { .. } => "ChangeDetected",
            MonitorEvent::CheckFailed { .. } => "CheckFailed",
            MonitorEvent::CycleCompleted { .. } => "CycleCompleted",
            MonitorEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A stored privacy version for example.com analyzed `age` ago.
pub fn make_test_version(text: &str, age: TimeDelta) -> PolicyVersion {
    PolicyVersion {
        id: Uuid::new_v4(),
        domain: "example.com".to_string(),
        document_type: DocumentType::Privacy,
        source_url: "https://example.com/privacy".to_string(),
        content_hash: content_hash(text),
        normalized_text: text.to_string(),
        structured_analysis: serde_json::json!({}),
        score: 70,
        word_count: word_count(text),
        analyzed_at: Utc::now() - age,
    }
}
