use std::time::Duration;

use url::Url;

use crate::error::AppError;

/// Default backend origin + API prefix when nothing is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api/v1";

/// Environment variable overriding the backend base URL.
pub const API_BASE_URL_ENV: &str = "LEADLIFT_API_BASE_URL";

/// Fixed cadence between processing-status polls.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Overall HTTP timeout. Uploads of large CSVs need headroom.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolved backend configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ApiConfig {
    /// Builds the config from the environment, falling back to the default
    /// local backend when `LEADLIFT_API_BASE_URL` is unset or empty.
    pub fn from_env() -> Result<Self, AppError> {
        let raw = std::env::var(API_BASE_URL_ENV).ok();
        Self::resolve(raw.as_deref())
    }

    /// Pure resolution step, separated from env access for testability.
    pub fn resolve(override_url: Option<&str>) -> Result<Self, AppError> {
        let raw = match override_url {
            Some(s) if !s.trim().is_empty() => s.trim(),
            _ => DEFAULT_API_BASE_URL,
        };
        // Trailing slashes break Url::join-based path building.
        let normalized = raw.trim_end_matches('/');
        let base_url = Url::parse(normalized)
            .map_err(|e| AppError::Internal(format!("Invalid API base URL '{}': {}", raw, e)))?;
        Ok(Self {
            base_url,
            timeout: HTTP_TIMEOUT,
        })
    }
}
