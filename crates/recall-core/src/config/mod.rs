//! Client and sync configuration.
//!
//! `SyncSettings` tunes the sync orchestrator. `ClientConfig` is the JSON file
//! a client reads at startup, with environment variables layered on top.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

/// Pending change attempts before the change is dropped
pub const DEFAULT_MAX_CHANGE_RETRIES: u32 = 3;
/// Delay before retrying a cycle that failed as a whole
pub const DEFAULT_ERROR_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Periodic sync interval while online
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Per-request timeout against the remote service
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const API_URL_ENV: &str = "RECALL_API_URL";
pub const API_TOKEN_ENV: &str = "RECALL_API_TOKEN";
pub const DB_PATH_ENV: &str = "RECALL_DB_PATH";

/// Sync orchestrator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub max_change_retries: u32,
    pub error_retry_delay: Duration,
    /// `None` disables the periodic timer (manual and reconnect syncs only)
    pub periodic_interval: Option<Duration>,
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_change_retries: DEFAULT_MAX_CHANGE_RETRIES,
            error_retry_delay: DEFAULT_ERROR_RETRY_DELAY,
            periodic_interval: Some(DEFAULT_PERIODIC_INTERVAL),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn with_max_change_retries(mut self, retries: u32) -> Self {
        self.max_change_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_error_retry_delay(mut self, delay: Duration) -> Self {
        self.error_retry_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }

    /// Disable the periodic timer
    #[must_use]
    pub const fn without_periodic_sync(mut self) -> Self {
        self.periodic_interval = None;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Client configuration file.
///
/// Unknown keys are rejected so typos surface instead of being ignored.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the remote service, e.g. `https://api.example.com`
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Parse and validate a JSON config payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidInput(format!("invalid client config: {error}")))?;
        config.normalized()
    }

    /// Load the config file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = normalize_text_option(lookup(API_URL_ENV)) {
            self.api_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(API_TOKEN_ENV)) {
            self.api_token = Some(token);
        }
        if let Some(path) = normalize_text_option(lookup(DB_PATH_ENV)) {
            self.db_path = Some(PathBuf::from(path));
        }
        self.normalized()
    }

    /// Overlay `RECALL_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn normalized(mut self) -> Result<Self> {
        self.api_url = normalize_text_option(self.api_url)
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_token = normalize_text_option(self.api_token);

        if let Some(url) = self.api_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "api_url must start with http:// or https://".to_string(),
                ));
            }
        }
        if self.sync_interval_secs == Some(0) {
            return Err(Error::InvalidInput(
                "sync_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(Error::InvalidInput(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(self)
    }

    /// Orchestrator settings derived from this config
    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::default();
        if let Some(secs) = self.sync_interval_secs {
            settings = settings.with_periodic_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            settings = settings.with_request_timeout(Duration::from_secs(secs));
        }
        settings
    }

    /// Database path, falling back to `default` when unset
    pub fn db_path_or(&self, default: impl Into<PathBuf>) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| default.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sync_settings_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_change_retries, 3);
        assert_eq!(settings.error_retry_delay, Duration::from_secs(30));
        assert_eq!(settings.periodic_interval, Some(Duration::from_secs(300)));
        assert_eq!(settings.without_periodic_sync().periodic_interval, None);
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let error = ClientConfig::from_json(r#"{"api_url": "https://x.dev", "apiUrl": "y"}"#)
            .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_config_rejects_invalid_url() {
        assert!(ClientConfig::from_json(r#"{"api_url": "api.example.com"}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"sync_interval_secs": 0}"#).is_err());
    }

    #[test]
    fn parse_config_trims_values() {
        let config = ClientConfig::from_json(
            r#"{"api_url": " https://api.example.com/ ", "api_token": "  ", "sync_interval_secs": 60}"#,
        )
        .unwrap();
        assert_eq!(config.api_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.api_token, None);
        assert_eq!(
            config.sync_settings().periodic_interval,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn env_overrides_take_precedence() {
        let values: HashMap<&str, &str> = HashMap::from([
            (API_URL_ENV, "http://localhost:8080"),
            (API_TOKEN_ENV, "secret"),
            (DB_PATH_ENV, "/tmp/recall.db"),
        ]);
        let config = ClientConfig {
            api_url: Some("https://api.example.com".to_string()),
            ..ClientConfig::default()
        }
        .with_overrides(|name| values.get(name).map(|value| (*value).to_string()))
        .unwrap();

        assert_eq!(config.api_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.db_path_or("unused"), PathBuf::from("/tmp/recall.db"));
    }

    #[test]
    fn debug_redacts_token() {
        let config = ClientConfig {
            api_token: Some("secret".to_string()),
            ..ClientConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&tmp.path().join("missing.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }
}
