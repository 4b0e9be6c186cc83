use std::path::PathBuf;
use std::sync::Arc;

use recall_core::{ClientConfig, HttpRemoteService, LocalStore, NetworkMonitor, StudyRecorder};

use crate::error::CliError;

/// Everything a command needs to reach local and remote state
#[derive(Debug, Clone)]
pub struct Context {
    pub config: ClientConfig,
    pub db_path: PathBuf,
    /// Treat the device as disconnected
    pub offline: bool,
}

impl Context {
    pub async fn open_store(&self) -> Result<LocalStore, CliError> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(LocalStore::open_path(self.db_path.clone()).await?)
    }

    pub fn network(&self) -> Arc<NetworkMonitor> {
        Arc::new(NetworkMonitor::new(!self.offline))
    }

    pub async fn recorder(&self) -> Result<(StudyRecorder, LocalStore), CliError> {
        let store = self.open_store().await?;
        Ok((StudyRecorder::new(store.clone(), self.network()), store))
    }

    pub fn remote(&self) -> Result<HttpRemoteService, CliError> {
        let url = self
            .config
            .api_url
            .clone()
            .ok_or(CliError::SyncNotConfigured)?;
        let settings = self.config.sync_settings();
        Ok(HttpRemoteService::new(
            url,
            self.config.api_token.clone(),
            settings.request_timeout,
        )?)
    }
}

/// Build the command context from flags, the config file and `RECALL_*` variables.
///
/// An explicit `--db-path` wins over the config file and the environment.
pub fn resolve_context(
    db_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    offline: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Context, CliError> {
    let config_path = config_path.unwrap_or_else(default_config_path);
    let config = ClientConfig::load(&config_path)?.with_overrides(lookup)?;
    let db_path = db_path.unwrap_or_else(|| config.db_path_or(default_db_path()));
    tracing::debug!("Using database {}", db_path.display());

    Ok(Context {
        config,
        db_path,
        offline,
    })
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
        .join("recall.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
        .join("config.json")
}

pub fn parse_session_id(raw: &str) -> Result<recall_core::SessionId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidSessionId(raw.trim().to_string()))
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn format_accuracy(correct: u32, answered: u32) -> String {
    if answered == 0 {
        return "no answers".to_string();
    }
    let percent = f64::from(correct) * 100.0 / f64::from(answered);
    format!("{correct}/{answered} correct ({percent:.0}%)")
}
