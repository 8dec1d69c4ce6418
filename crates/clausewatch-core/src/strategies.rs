//! Named, ordered strategies used by the fetch cascade once direct fetching
//! has failed: alternate URL transforms, then archival fallback sources.
//!
//! Each strategy is a pure capability (build a URL, clean injected markup);
//! the cascade owns all network access and simply iterates the lists.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::locale;

/// A transform producing a plausible sibling URL for the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlternateUrl {
    /// `/de/privacy` -> `/en/privacy`, `/privacy` -> `/en/privacy`.
    LocaleSwap,
    /// `/privacy` -> `/legal/privacy`.
    LegalPrefix,
    /// `/privacy` -> `/privacy/index.html`.
    IndexHtml,
    /// `/privacy` <-> `/privacy/`.
    TrailingSlash,
    /// `/privacy` -> `/privacy-policy`.
    PolicySuffix,
}

impl AlternateUrl {
    /// Default probing order.
    pub const DEFAULT_ORDER: [AlternateUrl; 5] = [
        AlternateUrl::LocaleSwap,
        AlternateUrl::LegalPrefix,
        AlternateUrl::IndexHtml,
        AlternateUrl::TrailingSlash,
        AlternateUrl::PolicySuffix,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlternateUrl::LocaleSwap => "locale_swap",
            AlternateUrl::LegalPrefix => "legal_prefix",
            AlternateUrl::IndexHtml => "index_html",
            AlternateUrl::TrailingSlash => "trailing_slash",
            AlternateUrl::PolicySuffix => "policy_suffix",
        }
    }

    /// The transformed URL, or `None` if the transform does not apply or
    /// would yield the input unchanged.
    pub fn apply(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let path = parsed.path().to_string();

        let candidate = match self {
            AlternateUrl::LocaleSwap => match locale::english_variants(url).into_iter().next() {
                Some(v) => v,
                None => {
                    if path.starts_with("/en/") || path == "/" {
                        return None;
                    }
                    with_path(&parsed, &format!("/en{path}"))
                }
            },
            AlternateUrl::LegalPrefix => {
                if path.starts_with("/legal/") || path == "/" {
                    return None;
                }
                with_path(&parsed, &format!("/legal{path}"))
            }
            AlternateUrl::IndexHtml => {
                let lower = path.to_ascii_lowercase();
                if [".html", ".htm", ".pdf", ".php", ".aspx"]
                    .iter()
                    .any(|ext| lower.ends_with(ext))
                {
                    return None;
                }
                with_path(&parsed, &format!("{}/index.html", path.trim_end_matches('/')))
            }
            AlternateUrl::TrailingSlash => {
                if path == "/" {
                    return None;
                }
                match path.strip_suffix('/') {
                    Some(stripped) => with_path(&parsed, stripped),
                    None => with_path(&parsed, &format!("{path}/")),
                }
            }
            AlternateUrl::PolicySuffix => {
                let trimmed = path.trim_end_matches('/');
                let (parent, last) = trimmed.rsplit_once('/')?;
                let replacement = match last.to_ascii_lowercase().as_str() {
                    "privacy" | "privacy.html" | "privacypolicy" => "privacy-policy",
                    "terms" | "tos" | "terms.html" => "terms-of-service",
                    _ => return None,
                };
                with_path(&parsed, &format!("{parent}/{replacement}"))
            }
        };

        if candidate == url { None } else { Some(candidate) }
    }
}

fn with_path(url: &Url, path: &str) -> String {
    let mut out = url.clone();
    out.set_path(path);
    out.to_string()
}

/// A third-party source holding a copy of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackSource {
    /// A cache mirror addressed as `{base_url}{original_url}`.
    CacheMirror { base_url: String },
    /// An archive exposing an availability API that returns the closest
    /// snapshot for a URL.
    ArchiveSnapshot { availability_url: String },
}

impl FallbackSource {
    pub fn name(&self) -> &'static str {
        match self {
            FallbackSource::CacheMirror { .. } => "cache_mirror",
            FallbackSource::ArchiveSnapshot { .. } => "archive_snapshot",
        }
    }

    /// URL of the mirrored copy.
    pub fn mirror_url(base_url: &str, url: &str) -> String {
        format!("{base_url}{url}")
    }

    /// URL of the availability lookup for `url`.
    pub fn availability_query(availability_url: &str, url: &str) -> Option<String> {
        Url::parse_with_params(availability_url, &[("url", url)])
            .ok()
            .map(|u| u.to_string())
    }

    /// Remove markup the source injects around the original page.
    pub fn strip_injected_markup(&self, html: &str) -> String {
        match self {
            FallbackSource::CacheMirror { .. } => strip_mirror_banner(html),
            FallbackSource::ArchiveSnapshot { .. } => strip_archive_toolbar(html),
        }
    }
}

// ---------------------------------------------------------------------------
// Archive availability API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<ClosestSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ClosestSnapshot {
    #[serde(default)]
    available: bool,
    url: String,
    #[serde(default)]
    status: Option<String>,
}

static SNAPSHOT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/web/(\d{1,14})/").expect("valid snapshot regex"));

/// Parse an availability response into the raw (toolbar-free) snapshot URL.
///
/// Returns `None` when no usable snapshot exists.
pub fn closest_snapshot_url(body: &[u8]) -> Option<String> {
    let response: AvailabilityResponse = serde_json::from_slice(body).ok()?;
    let closest = response.archived_snapshots.closest?;
    if !closest.available {
        return None;
    }
    if let Some(status) = &closest.status {
        if !status.starts_with('2') {
            return None;
        }
    }
    let url = closest.url.replacen("http://", "https://", 1);
    Some(
        SNAPSHOT_TIMESTAMP
            .replacen(&url, 1, "/web/${1}id_/")
            .into_owned(),
    )
}

// ---------------------------------------------------------------------------
// Injected markup removal
// ---------------------------------------------------------------------------

const MIRROR_BANNER_IDS: &[&str] = &["bN015htcoyT__google-cache-hdr", "google-cache-hdr"];

static BASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base\s[^>]*>").expect("valid base regex"));

static TOOLBAR_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*BEGIN WAYBACK TOOLBAR INSERT\s*-->.*?<!--\s*END WAYBACK TOOLBAR INSERT\s*-->")
        .expect("valid toolbar regex")
});

static ARCHIVE_SCRIPTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*(?:archive\.org|wombat|/_static/)[^>]*>.*?</script>|<script[^>]*>[^<]*__wm\.[^<]*</script>"#)
        .expect("valid archive script regex")
});

static ARCHIVE_LINKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link[^>]*(?:archive\.org|/_static/)[^>]*>"#).expect("valid archive link regex")
});

static ARCHIVE_TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*FILE ARCHIVED ON.*?-->").expect("valid archive trailer regex")
});

/// Remove a `<div id="...">` element including nested divs.
fn strip_div_by_id(html: &str, id: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let needle = format!("id=\"{}\"", id.to_ascii_lowercase());
    let Some(attr_pos) = lower.find(&needle) else {
        return html.to_string();
    };
    let Some(start) = lower[..attr_pos].rfind("<div") else {
        return html.to_string();
    };

    let mut depth = 0usize;
    let mut cursor = start;
    while cursor < lower.len() {
        let next_open = lower[cursor..].find("<div").map(|i| cursor + i);
        let next_close = lower[cursor..].find("</div").map(|i| cursor + i);
        match (next_open, next_close) {
            (Some(open), Some(close)) if open < close => {
                depth += 1;
                cursor = open + 4;
            }
            (_, Some(close)) => {
                depth = depth.saturating_sub(1);
                let end = lower[close..]
                    .find('>')
                    .map_or(lower.len(), |i| close + i + 1);
                cursor = end;
                if depth == 0 {
                    return format!("{}{}", &html[..start], &html[end..]);
                }
            }
            _ => break,
        }
    }
    // Unbalanced markup: drop everything from the banner on rather than keep it.
    html[..start].to_string()
}

pub fn strip_mirror_banner(html: &str) -> String {
    let mut out = html.to_string();
    for id in MIRROR_BANNER_IDS {
        out = strip_div_by_id(&out, id);
    }
    BASE_TAG.replace_all(&out, "").into_owned()
}

pub fn strip_archive_toolbar(html: &str) -> String {
    let out = TOOLBAR_BLOCK.replace_all(html, "");
    let out = ARCHIVE_SCRIPTS.replace_all(&out, "");
    let out = ARCHIVE_LINKS.replace_all(&out, "");
    ARCHIVE_TRAILER.replace_all(&out, "").into_owned()
}
