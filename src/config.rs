//! Runtime configuration for the REST client and session persistence

use crate::constants::{
    AUTH_SNAPSHOT_FILE, DEDUP_WINDOW_SECS, DEFAULT_API_URL, REQUEST_TIMEOUT_SECS, USER_AGENT,
};
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration
///
/// Defaults come from [`crate::constants`]; `from_env` overrides them with
/// `DASHBOARD_API_URL`, `DASHBOARD_REQUEST_TIMEOUT_SECS` and
/// `DASHBOARD_SNAPSHOT_PATH` when set.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// User agent sent with every request
    pub user_agent: String,
    /// Where the auth snapshot is persisted
    pub snapshot_path: PathBuf,
    /// Telemetry deduplication window
    pub dedup_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
            snapshot_path: default_snapshot_path(),
            dedup_window: Duration::from_secs(DEDUP_WINDOW_SECS),
        }
    }
}

impl ClientConfig {
    /// Builds a configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DASHBOARD_API_URL") {
            config = config.with_base_url(url);
        }

        if let Ok(raw) = std::env::var("DASHBOARD_REQUEST_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => config.request_timeout = Duration::from_secs(secs),
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "Ignoring invalid DASHBOARD_REQUEST_TIMEOUT_SECS"
                ),
            }
        }

        if let Ok(path) = std::env::var("DASHBOARD_SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }

        config
    }

    /// Sets the backend base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the snapshot file location
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Sets the telemetry deduplication window
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }
}

fn default_snapshot_path() -> PathBuf {
    std::env::temp_dir()
        .join("market-dashboard-sdk")
        .join(AUTH_SNAPSHOT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let config = ClientConfig::default().with_base_url("https://api.example.com/");
        assert_eq!(config.base_url, "https://api.example.com");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.dedup_window, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.snapshot_path.ends_with(AUTH_SNAPSHOT_FILE));
    }
}
