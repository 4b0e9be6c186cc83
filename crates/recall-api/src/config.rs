use std::collections::HashMap;
use std::env;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// libSQL file backing the analytics store; `:memory:` for throwaway runs
    pub database_path: String,
    /// Shared bearer token required on `/v1` when set
    pub api_token: Option<String>,
    pub max_results_per_session: usize,
    pub max_tz_offset_minutes: i32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("max_results_per_session", &self.max_results_per_session)
            .field("max_tz_offset_minutes", &self.max_tz_offset_minutes)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "RECALL_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "RECALL_API_DB_PATH", "recall-api.db");
        let api_token = optional_trimmed(&lookup, "RECALL_API_TOKEN");
        if api_token.as_deref().is_some_and(|token| token.len() < 16) {
            return Err(ConfigError::Invalid(
                "RECALL_API_TOKEN must be at least 16 characters".to_string(),
            ));
        }

        let max_results_per_session =
            value_or_default(&lookup, "RECALL_API_MAX_RESULTS_PER_SESSION", "1000")
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "RECALL_API_MAX_RESULTS_PER_SESSION must be an integer in [1, 10000]"
                            .to_string(),
                    )
                })?;
        if !(1..=10_000).contains(&max_results_per_session) {
            return Err(ConfigError::Invalid(
                "RECALL_API_MAX_RESULTS_PER_SESSION must be in [1, 10000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            api_token,
            max_results_per_session,
            max_tz_offset_minutes: 14 * 60,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(entries: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = entries.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "recall-api.db");
        assert_eq!(config.api_token, None);
        assert_eq!(config.max_results_per_session, 1000);
    }

    #[test]
    fn config_rejects_out_of_range_limits() {
        let err = config(&[("RECALL_API_MAX_RESULTS_PER_SESSION", "0")]).unwrap_err();
        assert!(err.to_string().contains("RECALL_API_MAX_RESULTS_PER_SESSION"));
        assert!(config(&[("RECALL_API_MAX_RESULTS_PER_SESSION", "lots")]).is_err());
        assert!(config(&[("RECALL_API_TOKEN", "short")]).is_err());
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = config(&[("RECALL_API_TOKEN", "sensitive-shared-token")]).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-shared-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
