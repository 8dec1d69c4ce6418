//! Detection of login walls, both before a request (URL blocklist) and after
//! one (login-page fingerprints in the body).

use std::sync::LazyLock;

use regex::Regex;

/// Bytes of a response body scanned for login fingerprints.
pub const AUTH_SCAN_BYTES: usize = 5 * 1024;

/// Path/query fragments that mark a URL as an authentication endpoint.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/sign-in",
    "/sign_in",
    "/oauth",
    "/auth/",
    "/sso",
    "/checkpoint/",
    "/accounts/",
    "redirect_uri=",
    "returnurl=",
    "return_to=",
];

static PASSWORD_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<input[^>]+type\s*=\s*["']?password"#).expect("valid password regex")
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

const LOGIN_PHRASES: &[&str] = &["sign in", "log in", "login", "sign-in", "anmelden", "connexion"];

/// Returns the matching blocklist pattern if the URL is an auth endpoint.
pub fn blocked_url_pattern(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    // Only look past the scheme and host so "login.example.com" is not a match.
    let rest = match lower.find("://") {
        Some(i) => match lower[i + 3..].find('/') {
            Some(j) => &lower[i + 3 + j..],
            None => return None,
        },
        None => lower.as_str(),
    };
    BLOCKED_URL_PATTERNS
        .iter()
        .copied()
        .find(|pattern| rest.contains(pattern))
}

/// Scan the head of a response body for login-page fingerprints.
///
/// Returns a short reason when the page looks like a login form: a password
/// input, or a `<title>` that names a sign-in page.
pub fn login_fingerprint(body: &[u8]) -> Option<&'static str> {
    let head = &body[..body.len().min(AUTH_SCAN_BYTES)];
    let head = String::from_utf8_lossy(head);

    if PASSWORD_INPUT.is_match(&head) {
        return Some("password input field");
    }

    if let Some(caps) = TITLE.captures(&head) {
        let title = caps[1].to_lowercase();
        if LOGIN_PHRASES.iter().any(|p| title.contains(p)) {
            return Some("sign-in page title");
        }
    }

    None
}
