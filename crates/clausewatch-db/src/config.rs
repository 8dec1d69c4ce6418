use clausewatch_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the version and change store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Read `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    /// (optional, defaults to 5).
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").ok();
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS").ok();
        Self::from_values(url, max_connections.as_deref())
    }

    fn from_values(url: Option<String>, max_connections: Option<&str>) -> Result<Self, AppError> {
        let url = url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError(
                "DATABASE_URL not set. Required for version history and change tracking.".into(),
            )
        })?;

        let Some(raw) = max_connections else {
            return Ok(Self::new(url));
        };
        let parsed: u32 = raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
            ))
        })?;
        if parsed == 0 {
            return Err(AppError::ConfigError(
                "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        Ok(Self::new(url).with_max_connections(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "postgresql://localhost/clausewatch";

    #[test]
    fn defaults_pool_size() {
        let config = DatabaseConfig::from_values(Some(URL.into()), None).unwrap();
        assert_eq!(config.url, URL);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn parses_pool_size() {
        let config = DatabaseConfig::from_values(Some(URL.into()), Some(" 12 ")).unwrap();
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn rejects_missing_url_and_bad_pool_size() {
        assert!(matches!(
            DatabaseConfig::from_values(None, None),
            Err(AppError::ConfigError(_))
        ));
        assert!(matches!(
            DatabaseConfig::from_values(Some("  ".into()), None),
            Err(AppError::ConfigError(_))
        ));
        assert!(DatabaseConfig::from_values(Some(URL.into()), Some("0")).is_err());
        assert!(DatabaseConfig::from_values(Some(URL.into()), Some("many")).is_err());
    }
}
