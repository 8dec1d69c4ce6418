//! Paragraph and structured-field comparison of two stored versions.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::PolicyVersion;
use crate::traits::VersionStore;

/// Analysis keys compared field by field. `score` comes from the version row.
pub const STRUCTURED_KEYS: [&str; 5] = [
    "summary",
    "score",
    "data_collected",
    "third_party_sharing",
    "user_rights",
];

/// Paragraph-level difference. Set membership, not alignment: reordering
/// paragraphs produces no entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub key: String,
    pub changed: bool,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionDiff {
    /// The chronologically earlier version.
    pub old_version_id: Uuid,
    pub new_version_id: Uuid,
    pub text: TextDiff,
    pub structured: Vec<FieldDiff>,
    pub score_delta: i32,
    pub word_count_delta: i64,
}

impl VersionDiff {
    pub fn has_text_changes(&self) -> bool {
        !self.text.added.is_empty() || !self.text.removed.is_empty()
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldDiff> {
        self.structured.iter().filter(|f| f.changed)
    }
}

/// Split on blank lines, dropping empty paragraphs.
pub fn paragraphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                out.push(text[s..end].trim());
            }
        } else {
            start.get_or_insert(line_start);
            end = offset;
        }
    }
    if let Some(s) = start {
        out.push(text[s..end].trim());
    }
    out
}

fn paragraph_key(paragraph: &str) -> String {
    paragraph.trim().to_lowercase()
}

pub fn diff_text(old: &str, new: &str) -> TextDiff {
    let old_paragraphs = paragraphs(old);
    let new_paragraphs = paragraphs(new);
    let old_set: HashSet<String> = old_paragraphs.iter().map(|p| paragraph_key(p)).collect();
    let new_set: HashSet<String> = new_paragraphs.iter().map(|p| paragraph_key(p)).collect();

    let mut diff = TextDiff::default();
    for paragraph in &new_paragraphs {
        if old_set.contains(&paragraph_key(paragraph)) {
            diff.unchanged += 1;
        } else {
            diff.added.push(paragraph.to_string());
        }
    }
    for paragraph in &old_paragraphs {
        if !new_set.contains(&paragraph_key(paragraph)) {
            diff.removed.push(paragraph.to_string());
        }
    }
    diff
}

fn structured_value(version: &PolicyVersion, key: &str) -> serde_json::Value {
    if key == "score" {
        return serde_json::Value::from(version.score);
    }
    version
        .structured_analysis
        .get(key)
        .cloned()
        .unwrap_or(serde_json::Value::Null)
}

pub fn diff_structured(old: &PolicyVersion, new: &PolicyVersion) -> Vec<FieldDiff> {
    STRUCTURED_KEYS
        .iter()
        .map(|key| {
            let old_value = structured_value(old, key);
            let new_value = structured_value(new, key);
            FieldDiff {
                key: key.to_string(),
                changed: old_value != new_value,
                old: old_value,
                new: new_value,
            }
        })
        .collect()
}

/// Compare two versions, ordering them by `analyzed_at` regardless of
/// argument order.
pub fn diff_versions(a: &PolicyVersion, b: &PolicyVersion) -> VersionDiff {
    let (old, new) = if a.analyzed_at <= b.analyzed_at {
        (a, b)
    } else {
        (b, a)
    };

    VersionDiff {
        old_version_id: old.id,
        new_version_id: new.id,
        text: diff_text(&old.normalized_text, &new.normalized_text),
        structured: diff_structured(old, new),
        score_delta: new.score - old.score,
        word_count_delta: i64::from(new.word_count) - i64::from(old.word_count),
    }
}

/// Loads versions from a store and diffs them.
#[derive(Clone)]
pub struct DiffEngine<S: VersionStore> {
    store: S,
}

impl<S: VersionStore> DiffEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn load(&self, id: Uuid) -> Result<PolicyVersion, AppError> {
        self.store
            .get_version_by_id(id)
            .await?
            .ok_or_else(|| AppError::VersionNotFound(id.to_string()))
    }

    pub async fn compare(&self, version_a: Uuid, version_b: Uuid) -> Result<VersionDiff, AppError> {
        let a = self.load(version_a).await?;
        let b = self.load(version_b).await?;
        let diff = diff_versions(&a, &b);
        tracing::debug!(
            old = %diff.old_version_id,
            new = %diff.new_version_id,
            added = diff.text.added.len(),
            removed = diff.text.removed.len(),
            "Compared versions"
        );
        Ok(diff)
    }
}
