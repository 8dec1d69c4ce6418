use std::sync::Arc;

use clausewatch_core::error::AppError;
use clausewatch_core::models::ExtractedDocument;
use clausewatch_core::recovery::{ContentRecovery, HydrationBlobRecovery};
use clausewatch_core::traits::ContentExtractor;
use clausewatch_core::validation;

use crate::html::HtmlExtractor;
use crate::pdf;

/// Collapse intra-line whitespace and runs of blank lines.
pub fn normalize_plain_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_blank = false;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !previous_blank && !out.is_empty() {
                out.push('\n');
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn is_pdf(bytes: &[u8], content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("pdf") || bytes.starts_with(b"%PDF")
}

fn is_plain_text(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().starts_with("text/plain")
}

/// Turns fetched policy documents (HTML, PDF or plain text) into validated
/// normalized text.
#[derive(Clone)]
pub struct PolicyExtractor {
    html: HtmlExtractor,
    recoveries: Vec<Arc<dyn ContentRecovery>>,
}

impl PolicyExtractor {
    pub fn new() -> Self {
        Self {
            html: HtmlExtractor::new(),
            recoveries: vec![Arc::new(HydrationBlobRecovery)],
        }
    }

    /// Append a recovery step, tried after the built-in ones.
    pub fn with_recovery(mut self, recovery: Arc<dyn ContentRecovery>) -> Self {
        self.recoveries.push(recovery);
        self
    }

    fn recover(&self, text: String) -> String {
        self.recoveries
            .iter()
            .find_map(|r| r.recover(&text))
            .unwrap_or(text)
    }
}

impl Default for PolicyExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for PolicyExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        url: &str,
    ) -> Result<ExtractedDocument, AppError> {
        let (title, text) = if is_pdf(bytes, content_type) {
            (url.to_string(), pdf::extract_text(bytes)?)
        } else if is_plain_text(content_type) {
            let text = normalize_plain_text(&String::from_utf8_lossy(bytes));
            (url.to_string(), text)
        } else {
            self.html.extract(&String::from_utf8_lossy(bytes), url)?
        };

        let text = self.recover(text);
        validation::validate(&text, url)?;

        tracing::debug!(%url, chars = text.chars().count(), "Extracted policy text");
        Ok(ExtractedDocument::new(title, text))
    }
}
