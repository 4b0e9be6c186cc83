use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] recall_core::Error),
    #[error(transparent)]
    Remote(#[from] recall_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid session ID '{0}'")]
    InvalidSessionId(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Payload must be a JSON object")]
    InvalidPayload,
    #[error("Sync is offline; queued work stays on this device")]
    Offline,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Sync is not configured. Set api_url in the config file or RECALL_API_URL.")]
    SyncNotConfigured,
}
