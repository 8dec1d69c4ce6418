use std::time::Duration;

use clausewatch_core::error::AppError;
use clausewatch_core::models::Analysis;
use clausewatch_core::traits::Analyzer;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Category names emitted by older analysis services, and their current names.
const LEGACY_CATEGORIES: &[(&str, &str)] = &[
    ("data_sharing", "third_party_sharing"),
    ("data_collection", "data_collected"),
    ("rights", "user_rights"),
    ("retention", "data_retention"),
    ("cookies_tracking", "tracking"),
];

fn current_category(name: &str) -> Option<&'static str> {
    LEGACY_CATEGORIES
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, current)| *current)
}

/// Rewrite legacy category names in top-level keys and in
/// `findings[].category`. A current key already present wins over its
/// legacy alias.
pub fn translate_legacy_categories(structured: Value) -> Value {
    let Value::Object(map) = structured else {
        return structured;
    };

    let mut out = Map::with_capacity(map.len());
    let mut legacy = Vec::new();
    for (key, value) in map {
        match current_category(&key) {
            Some(current) => legacy.push((current, value)),
            None => {
                out.insert(key, value);
            }
        }
    }
    for (current, value) in legacy {
        out.entry(current).or_insert(value);
    }

    if let Some(Value::Array(findings)) = out.get_mut("findings") {
        for finding in findings.iter_mut() {
            let renamed = finding
                .get("category")
                .and_then(Value::as_str)
                .and_then(current_category);
            if let (Some(current), Some(obj)) = (renamed, finding.as_object_mut()) {
                obj.insert("category".into(), Value::String(current.into()));
            }
        }
    }

    Value::Object(out)
}

/// Split a service response into score and structured analysis.
pub fn parse_analysis(body: Value) -> Result<Analysis, AppError> {
    let score = body
        .get("score")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::AnalysisError("Response has no integer score".into()))?;
    let score = i32::try_from(score)
        .map_err(|_| AppError::AnalysisError(format!("Score out of range: {score}")))?;

    Ok(Analysis {
        score,
        structured: translate_legacy_categories(body),
    })
}

// ---- Service API types ----

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiError {
    error: String,
}

/// Adapter for an HTTP analysis service.
///
/// POSTs `{"text": ...}` to the endpoint and expects a JSON object carrying
/// at least an integer `score`. The whole object is kept as the structured
/// analysis.
#[derive(Clone)]
pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpAnalyzer {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        Self::build(endpoint, None, DEFAULT_ANALYSIS_TIMEOUT)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        let api_key = self.api_key.clone();
        Self::build(&self.endpoint, api_key, timeout)
    }

    fn build(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        url::Url::parse(endpoint)
            .map_err(|e| AppError::ConfigError(format!("Invalid analyzer URL {endpoint}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Analysis, AppError> {
        let mut request = self.client.post(&self.endpoint).json(&AnalyzeRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status.as_u16(), body));
            return Err(AppError::AnalysisError(message));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::AnalysisError(format!("Failed to parse response: {e}")))?;

        let analysis = parse_analysis(body)?;
        tracing::debug!(score = analysis.score, "Analysis received");
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn legacy_keys_and_finding_categories_are_renamed() {
        let translated = translate_legacy_categories(json!({
            "score": 55,
            "data_sharing": "extensive",
            "findings": [
                {"category": "data_collection", "severity": "high"},
                {"category": "user_rights", "severity": "low"}
            ]
        }));

        assert_eq!(translated["third_party_sharing"], "extensive");
        assert!(translated.get("data_sharing").is_none());
        assert_eq!(translated["findings"][0]["category"], "data_collected");
        assert_eq!(translated["findings"][1]["category"], "user_rights");
    }

    #[test]
    fn current_key_wins_over_legacy_alias() {
        let translated = translate_legacy_categories(json!({
            "rights": "old",
            "user_rights": "new"
        }));
        assert_eq!(translated["user_rights"], "new");
        assert!(translated.get("rights").is_none());
    }

    #[test]
    fn non_object_is_left_alone() {
        assert_eq!(translate_legacy_categories(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn parse_requires_integer_score() {
        let analysis = parse_analysis(json!({"score": 81, "findings": []})).unwrap();
        assert_eq!(analysis.score, 81);
        assert_eq!(analysis.structured["findings"], json!([]));

        let err = parse_analysis(json!({"score": "high"})).unwrap_err();
        assert!(matches!(err, AppError::AnalysisError(_)));
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        assert!(matches!(
            HttpAnalyzer::new("not a url").err(),
            Some(AppError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let analyzer = HttpAnalyzer::new("http://127.0.0.1:1/analyze")
            .unwrap()
            .with_timeout(Duration::from_secs(2))
            .unwrap();
        let err = analyzer.analyze("text").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::NetworkError(_) | AppError::HttpError(_) | AppError::Timeout(_)
        ));
    }
}
