//! Locale-redirect detection and English URL substitution.
//!
//! Many sites geo-redirect `/privacy` to `/de/privacy` or `?hl=fr`. The
//! cascade uses these helpers to notice the redirect and try English
//! variants of the final URL.

use url::Url;

const NON_ENGLISH_LANGUAGES: &[&str] = &[
    "de", "fr", "es", "it", "nl", "pt", "ja", "ko", "zh", "ru", "pl", "sv", "da", "fi", "no",
    "nb", "tr", "cs", "hu", "ro", "el", "he", "ar", "th", "id", "vi", "uk",
];

const LOCALE_QUERY_KEYS: &[&str] = &["hl", "lang", "locale", "language"];

/// Where in a URL a locale marker was found.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LocaleMarker {
    /// Index into the path segments.
    Segment(usize, String),
    Query(String, String),
}

impl LocaleMarker {
    fn code(&self) -> &str {
        match self {
            LocaleMarker::Segment(_, code) | LocaleMarker::Query(_, code) => code,
        }
    }
}

/// `de`, `de-DE`, `pt_br` -> true; `en`, `en-gb`, `legal` -> false.
fn is_non_english_locale(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    let lang = match lower.split_once(['-', '_']) {
        Some((lang, region)) => {
            if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
                return false;
            }
            lang
        }
        None => lower.as_str(),
    };
    NON_ENGLISH_LANGUAGES.contains(&lang)
}

fn find_marker(url: &Url) -> Option<LocaleMarker> {
    if let Some(segments) = url.path_segments() {
        let segments: Vec<&str> = segments.collect();
        // The last segment is the page itself, never a locale prefix.
        let prefix_len = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().take(prefix_len).enumerate() {
            if is_non_english_locale(segment) {
                return Some(LocaleMarker::Segment(i, segment.to_ascii_lowercase()));
            }
        }
    }

    url.query_pairs().find_map(|(key, value)| {
        let key = key.to_ascii_lowercase();
        if LOCALE_QUERY_KEYS.contains(&key.as_str()) && is_non_english_locale(&value) {
            Some(LocaleMarker::Query(key, value.to_ascii_lowercase()))
        } else {
            None
        }
    })
}

/// The non-English locale carried by a URL, if any.
pub fn non_english_locale(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    find_marker(&parsed).map(|m| m.code().to_string())
}

/// The locale a request was redirected into: present on the final URL but
/// not on the requested one.
pub fn locale_redirect(requested: &str, final_url: &str) -> Option<String> {
    let final_locale = non_english_locale(final_url)?;
    match non_english_locale(requested) {
        Some(requested_locale) if requested_locale == final_locale => None,
        _ => Some(final_locale),
    }
}

fn with_segment(url: &Url, index: usize, replacement: Option<&str>) -> Option<String> {
    let segments: Vec<String> = url.path_segments()?.map(str::to_string).collect();
    let mut rebuilt: Vec<String> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        if i == index {
            if let Some(r) = replacement {
                rebuilt.push(r.to_string());
            }
        } else {
            rebuilt.push(segment);
        }
    }
    let mut out = url.clone();
    out.set_path(&format!("/{}", rebuilt.join("/")));
    Some(out.to_string())
}

fn with_query_value(url: &Url, key: &str, value: &str) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k.eq_ignore_ascii_case(key) {
                (k.into_owned(), value.to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    let mut out = url.clone();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out.to_string()
}

/// English substitutions of a locale-redirected URL, in preference order.
pub fn english_variants(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    let Some(marker) = find_marker(&parsed) else {
        return Vec::new();
    };

    let mut variants = Vec::new();
    match marker {
        LocaleMarker::Segment(index, _) => {
            for replacement in [Some("en"), Some("en-us"), None] {
                if let Some(v) = with_segment(&parsed, index, replacement) {
                    variants.push(v);
                }
            }
        }
        LocaleMarker::Query(key, _) => {
            variants.push(with_query_value(&parsed, &key, "en"));
        }
    }
    variants.dedup();
    variants
}
