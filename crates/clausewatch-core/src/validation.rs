//! Gates deciding whether extracted text is a policy document at all.

use crate::error::AppError;

/// Minimum text length when the URL strongly indicates a policy page.
pub const MIN_LENGTH_POLICY_URL: usize = 100;

/// Minimum text length otherwise.
pub const MIN_LENGTH_DEFAULT: usize = 250;

/// Path fragments that strongly indicate a policy document, across languages.
const POLICY_URL_PATTERNS: &[&str] = &[
    // en
    "/privacy",
    "/terms",
    "/tos",
    "/legal",
    "/cookie",
    "/data-protection",
    // de
    "/datenschutz",
    "/nutzungsbedingungen",
    "/agb",
    "/impressum",
    // fr
    "/confidentialite",
    "/politique-de-confidentialite",
    "/conditions-generales",
    "/mentions-legales",
    // es
    "/privacidad",
    "/politica-de-privacidad",
    "/terminos",
    "/aviso-legal",
    // nl
    "/privacybeleid",
    "/voorwaarden",
    // it
    "/informativa",
    "/termini",
    // pt
    "/privacidade",
    "/termos",
];

/// Terms whose presence marks text as a policy document.
const POLICY_TERMS: &[&str] = &[
    // en
    "privacy",
    "personal data",
    "personal information",
    "terms of service",
    "terms of use",
    "cookies",
    "data protection",
    "we collect",
    "third parties",
    "consent",
    // de
    "datenschutz",
    "personenbezogene daten",
    "nutzungsbedingungen",
    "einwilligung",
    // fr
    "confidentialité",
    "données personnelles",
    "conditions d'utilisation",
    "consentement",
    // es
    "privacidad",
    "datos personales",
    "términos",
    "consentimiento",
    // nl
    "privacybeleid",
    "persoonsgegevens",
    "voorwaarden",
    // it
    "informativa",
    "dati personali",
    "termini",
    // pt
    "privacidade",
    "dados pessoais",
    "termos de uso",
];

fn url_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    }
}

/// True if the URL path matches a known policy path in any supported language.
pub fn is_policy_url(url: &str) -> bool {
    let path = url_path(url);
    POLICY_URL_PATTERNS.iter().any(|p| path.contains(p))
}

pub fn min_length_for(url: &str) -> usize {
    if is_policy_url(url) {
        MIN_LENGTH_POLICY_URL
    } else {
        MIN_LENGTH_DEFAULT
    }
}

/// The first policy-indicator term found in the text, if any.
pub fn policy_term(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    POLICY_TERMS.iter().copied().find(|t| lower.contains(t))
}

/// Apply the length gate, then the validity gate.
pub fn validate(text: &str, url: &str) -> Result<(), AppError> {
    let length = text.chars().count();
    let required = min_length_for(url);
    if length < required {
        return Err(AppError::ContentTooShort { length, required });
    }

    if policy_term(text).is_none() && !is_policy_url(url) {
        return Err(AppError::ContentValidationFailed(format!(
            "no policy terms found in {length} chars from {url}"
        )));
    }
    Ok(())
}
