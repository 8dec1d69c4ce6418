use thiserror::Error;

/// Application-wide error types for clausewatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// The URL or the returned page is a login wall. Never retried.
    #[error("Authentication wall detected at {url}: {reason}")]
    AuthWallDetected { url: String, reason: String },

    /// HTTP 401/403 from the target.
    #[error("Access forbidden (HTTP {status}) for {url}")]
    Forbidden { status: u16, url: String },

    /// HTTP 429 retries exhausted.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// HTTP 5xx after local retries.
    #[error("Server error (HTTP {status}) for {url}")]
    ServerError { status: u16, url: String },

    /// Any other non-success status (404, 410, ...).
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// HTTP request failed before a status was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Extraction produced too little text to be a policy document.
    #[error("Content too short: {length} chars (need at least {required})")]
    ContentTooShort { length: usize, required: usize },

    /// Extraction succeeded but the text does not look like a policy document.
    #[error("Content validation failed: {0}")]
    ContentValidationFailed(String),

    /// Format-level extraction failure (unreadable PDF, converter error).
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Every strategy of the fetch cascade failed.
    #[error("All fetch strategies exhausted for {url}: {cause}")]
    AllStrategiesExhausted { url: String, cause: Box<AppError> },

    /// Persistence layer failure, surfaced verbatim.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    /// A recheck needs a stored version to know what to compare against.
    #[error("No stored version for {domain} ({document_type})")]
    NoBaseline {
        domain: String,
        document_type: String,
    },

    /// The analysis collaborator failed.
    #[error("Analysis error: {0}")]
    AnalysisError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::ServerError { .. } => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            AppError::AllStrategiesExhausted { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the target actively refused us (login wall, 401/403).
    pub fn is_blocked(&self) -> bool {
        match self {
            AppError::AuthWallDetected { .. } | AppError::Forbidden { .. } => true,
            AppError::AllStrategiesExhausted { cause, .. } => cause.is_blocked(),
            _ => false,
        }
    }

    /// Terminal errors stop the fetch cascade immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppError::AuthWallDetected { .. })
    }

    /// Whether trying another user-agent could change the outcome.
    pub fn is_user_agent_sensitive(&self) -> bool {
        matches!(
            self,
            AppError::Forbidden { .. }
                | AppError::RateLimitExceeded
                | AppError::ServerError { .. }
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::HttpError(_)
        )
    }

    /// Ranking used to pick the cause reported by an exhausted cascade.
    ///
    /// Blocked/forbidden outranks everything else so users get the
    /// "try later or paste manually" guidance rather than a vague network error.
    pub fn informativeness(&self) -> u8 {
        match self {
            AppError::AuthWallDetected { .. } => 6,
            AppError::Forbidden { .. } => 5,
            AppError::RateLimitExceeded => 4,
            AppError::ServerError { .. } => 3,
            AppError::HttpStatus { .. } => 2,
            AppError::ContentTooShort { .. } | AppError::ContentValidationFailed(_) => 2,
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::HttpError(_) => 1,
            AppError::AllStrategiesExhausted { cause, .. } => cause.informativeness(),
            _ => 0,
        }
    }

    /// Short, user-facing advice for this failure.
    pub fn user_guidance(&self) -> &'static str {
        if self.is_blocked() {
            "The site blocked automated access. Try again later or paste the policy text manually."
        } else if self.is_retryable() {
            "A transient failure occurred. Please retry."
        } else {
            match self {
                AppError::ContentTooShort { .. } | AppError::ContentValidationFailed(_) => {
                    "The page does not look like a policy document. Check the URL."
                }
                AppError::AllStrategiesExhausted { cause, .. } => cause.user_guidance(),
                _ => "The request could not be completed.",
            }
        }
    }
}
