use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Upper bound on stored normalized text, in bytes.
pub const MAX_NORMALIZED_TEXT_BYTES: usize = 500 * 1024;

/// Kind of legal document tracked for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Privacy,
    Terms,
    Cookies,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Privacy => "privacy",
            DocumentType::Terms => "terms",
            DocumentType::Cookies => "cookies",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "privacy" | "privacy_policy" => Ok(DocumentType::Privacy),
            "terms" | "tos" | "terms_of_service" => Ok(DocumentType::Terms),
            "cookies" | "cookie_policy" => Ok(DocumentType::Cookies),
            "other" => Ok(DocumentType::Other),
            _ => Err(format!("Unknown document type: {}", s)),
        }
    }
}

/// A stored, analyzed snapshot of a policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub id: Uuid,
    pub domain: String,
    pub document_type: DocumentType,
    pub source_url: String,
    /// SHA-256 of the hash-normalized text
    pub content_hash: String,
    pub normalized_text: String,
    /// Opaque output of the analysis collaborator
    pub structured_analysis: serde_json::Value,
    pub score: i32,
    pub word_count: u32,
    pub analyzed_at: DateTime<Utc>,
}

/// DTO for upserting a version into the store.
#[derive(Debug, Clone, Serialize)]
pub struct NewPolicyVersion {
    pub domain: String,
    pub document_type: DocumentType,
    pub source_url: String,
    pub content_hash: String,
    pub normalized_text: String,
    pub structured_analysis: serde_json::Value,
    pub score: i32,
    pub word_count: u32,
    pub analyzed_at: DateTime<Utc>,
}

/// A detected divergence between two analyses of the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub domain: String,
    pub document_type: DocumentType,
    pub previous_version_id: Uuid,
    pub current_version_id: Uuid,
    pub previous_score: i32,
    pub current_score: i32,
    pub score_delta: i32,
    /// Analysis of the previous version as it was when the change was detected.
    pub previous_analysis: serde_json::Value,
    pub summary: String,
    pub detected_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

/// DTO for inserting a change record.
#[derive(Debug, Clone, Serialize)]
pub struct NewChangeRecord {
    pub domain: String,
    pub document_type: DocumentType,
    pub previous_version_id: Uuid,
    pub current_version_id: Uuid,
    pub previous_score: i32,
    pub current_score: i32,
    pub previous_analysis: serde_json::Value,
    pub summary: String,
}

impl NewChangeRecord {
    pub fn score_delta(&self) -> i32 {
        self.current_score - self.previous_score
    }
}

/// Raw HTTP response as seen by the fetch cascade.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("html") || ct.contains("xml")
            }
            None => looks_like_html(&self.body),
        }
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

/// Which cascade strategy produced a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum FetchSource {
    Direct,
    Alternate(String),
    CacheMirror,
    ArchiveSnapshot,
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchSource::Direct => write!(f, "direct"),
            FetchSource::Alternate(name) => write!(f, "alternate:{name}"),
            FetchSource::CacheMirror => write!(f, "cache_mirror"),
            FetchSource::ArchiveSnapshot => write!(f, "archive_snapshot"),
        }
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub final_url: String,
    pub source: FetchSource,
}

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedDocument {
    pub title: String,
    pub normalized_text: String,
    /// Length of `normalized_text` in chars.
    pub length: usize,
}

impl ExtractedDocument {
    pub fn new(title: impl Into<String>, normalized_text: String) -> Self {
        let length = normalized_text.chars().count();
        Self {
            title: title.into(),
            normalized_text,
            length,
        }
    }
}

/// Output of the analysis collaborator, persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub score: i32,
    pub structured: serde_json::Value,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Case-fold, collapse whitespace runs and trim.
///
/// Idempotent: normalizing twice yields the same string.
pub fn normalize_for_hash(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Change-detection fingerprint of a document's text.
pub fn content_hash(text: &str) -> String {
    compute_hash(&normalize_for_hash(text))
}

pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub fn cap_text(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
