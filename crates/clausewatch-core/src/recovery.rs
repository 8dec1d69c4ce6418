//! Recovery of policy text buried in single-page-app hydration payloads.
//!
//! Some sites ship the policy inside a JSON blob that the browser renders.
//! After HTML extraction the text then starts with `{"props":...` and the
//! actual prose only appears further in.

/// Only this many leading chars are searched for an anchor.
pub const ANCHOR_SEARCH_CHARS: usize = 1000;

const ANCHOR_PHRASES: &[&str] = &[
    "we collect",
    "privacy policy",
    "personal data",
    "personal information",
    "terms of service",
    "terms of use",
    "this policy",
    "datenschutz",
    "données personnelles",
    "datos personales",
];

/// A post-extraction step that salvages usable text from a malformed result.
pub trait ContentRecovery: Send + Sync {
    /// Returns the recovered text, or `None` when nothing applies.
    fn recover(&self, text: &str) -> Option<String>;
}

/// Slices a leading JSON blob off at the earliest anchor phrase.
#[derive(Debug, Clone, Default)]
pub struct HydrationBlobRecovery;

impl HydrationBlobRecovery {
    fn looks_like_blob(text: &str) -> bool {
        matches!(text.trim_start().chars().next(), Some('{' | '['))
    }
}

impl ContentRecovery for HydrationBlobRecovery {
    fn recover(&self, text: &str) -> Option<String> {
        let text = text.trim_start();
        if !Self::looks_like_blob(text) {
            return None;
        }

        let window_end = text
            .char_indices()
            .nth(ANCHOR_SEARCH_CHARS)
            .map_or(text.len(), |(i, _)| i);
        // Offsets must index `text`, not a lowercased copy.
        let window = &text[..window_end];

        let start = ANCHOR_PHRASES
            .iter()
            .filter_map(|phrase| find_case_insensitive(window, phrase))
            .min()?;

        tracing::debug!(offset = start, "Recovered text from hydration payload");
        Some(text[start..].to_string())
    }
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle_len = needle.chars().count();
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        let candidate: String = haystack[i..].chars().take(needle_len).collect();
        candidate.to_lowercase() == needle
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_blob_at_earliest_anchor() {
        let text = r#"{"props":{"page":"legal"}} Privacy Policy. We collect your email."#;
        let recovered = HydrationBlobRecovery.recover(text).unwrap();
        assert!(recovered.starts_with("Privacy Policy."));
    }

    #[test]
    fn plain_text_is_left_alone() {
        assert_eq!(HydrationBlobRecovery.recover("Privacy Policy\n\nWe collect..."), None);
    }

    #[test]
    fn blob_without_anchor_is_not_recovered() {
        assert_eq!(HydrationBlobRecovery.recover(r#"[{"id":1},{"id":2}]"#), None);
    }

    #[test]
    fn anchor_beyond_window_is_ignored() {
        let text = format!("{{\"x\":\"{}\"}} we collect data", "a".repeat(ANCHOR_SEARCH_CHARS));
        assert_eq!(HydrationBlobRecovery.recover(&text), None);
    }
}
