//! recall-core - Core library for Recall
//!
//! This crate contains the study models, the local durable store, the
//! spaced-repetition scheduler and the offline sync engine shared by the
//! Recall API and CLI.

pub mod config;
pub mod db;
pub mod due;
pub mod error;
pub mod models;
pub mod network;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod study;
pub mod sync;
pub mod util;

pub use config::{ClientConfig, SyncSettings};
pub use due::{DueBucket, DueCardAggregator, DueCardSource, DueCards, DueDay, SetDueCount};
pub use error::{Error, RemoteError, Result};
pub use models::{
    CardResult, CardScheduleState, PendingChange, ReviewSubmission, SessionId, StudySessionSummary,
};
pub use network::{Connectivity, NetworkMonitor};
pub use services::LocalStore;
pub use state::SyncState;
pub use study::StudyRecorder;
pub use sync::{HttpRemoteService, RemoteService, SyncEvent, SyncOrchestrator, SyncOutcome};
