use std::sync::{Arc, LazyLock};

use clausewatch_core::error::AppError;
use htmd::HtmlToMarkdown;
use scraper::{ElementRef, Html, Selector};

/// A content container must hold more than this many chars of text.
pub const MIN_CONTAINER_TEXT: usize = 200;

/// Elements that never carry policy text.
const NON_CONTENT: &str = "script, style, noscript, nav, footer, header, aside, iframe, svg, form, \
    template, button, \
    #onetrust-consent-sdk, .cc-window, [id*='cookie-banner'], [class*='cookie-banner'], \
    [id*='cookie-consent'], [class*='cookie-consent'], [class*='consent-banner'], \
    [class*='advert'], [id^='ad-'], [class*='ad-slot'], .ad, .ads";

/// Tried in order; the first with enough text wins.
const CONTENT_CONTAINERS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#main-content",
    ".main-content",
    ".privacy-policy",
    ".policy",
    ".legal",
    "#content",
    ".content",
];

static NON_CONTENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(NON_CONTENT).expect("valid non-content selector"));

static EMPTY_CANDIDATE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div, section, span, p, ul, li").expect("valid selector"));

static CONTAINER_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_CONTAINERS
        .iter()
        .map(|s| Selector::parse(s).expect("valid container selector"))
        .collect()
});

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid title selector"));
static H1_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid h1 selector"));
static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));
static MEDIA_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img, table, video").expect("valid media selector"));

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title from `<title>`, else the first `<h1>`, else the URL.
pub fn document_title(document: &Html, url: &str) -> String {
    [&*TITLE_SELECTOR, &*H1_SELECTOR]
        .iter()
        .filter_map(|selector| document.select(selector).next())
        .map(|element| element_text(&element))
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| url.to_string())
}

/// Detach non-content elements, then containers left without text or media.
fn prune(document: &mut Html) {
    let ids: Vec<_> = document
        .select(&NON_CONTENT_SELECTOR)
        .map(|e| e.id())
        .collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let empty: Vec<_> = document
        .select(&EMPTY_CANDIDATE_SELECTOR)
        .filter(|e| {
            e.text().all(|t| t.trim().is_empty()) && e.select(&MEDIA_SELECTOR).next().is_none()
        })
        .map(|e| e.id())
        .collect();
    for id in empty {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// HTML of the best content container, or of the whole body.
fn content_fragment(document: &Html) -> String {
    for (selector, name) in CONTAINER_SELECTORS.iter().zip(CONTENT_CONTAINERS) {
        if let Some(element) = document
            .select(selector)
            .find(|e| element_text(e).chars().count() > MIN_CONTAINER_TEXT)
        {
            tracing::debug!(container = %name, "Using content container");
            return element.html();
        }
    }
    match document.select(&BODY_SELECTOR).next() {
        Some(body) => body.html(),
        None => document.root_element().html(),
    }
}

/// Trim trailing whitespace on each line and collapse runs of blank lines.
pub fn normalize_markdown(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Readable-content extraction from HTML into normalized markdown.
#[derive(Clone)]
pub struct HtmlExtractor {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    /// Returns `(title, normalized markdown)`.
    pub fn extract(&self, html: &str, url: &str) -> Result<(String, String), AppError> {
        let mut document = Html::parse_document(html);
        let title = document_title(&document, url);

        prune(&mut document);
        let fragment = content_fragment(&document);

        let markdown = self
            .converter
            .convert(&fragment)
            .map_err(|e| AppError::ExtractionError(e.to_string()))?;

        Ok((title, normalize_markdown(&markdown)))
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}
