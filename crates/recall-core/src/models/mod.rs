//! Data models for Recall

mod card_result;
mod offline_set;
mod pending_change;
mod review;
mod schedule;
mod session;

pub use card_result::{CardAccuracy, CardResult, Confidence};
pub use offline_set::{OfflineCard, OfflineSet};
pub use pending_change::{ChangeOperation, EntityKind, PendingChange, PendingChangeId};
pub use review::ReviewSubmission;
pub use schedule::CardScheduleState;
pub use session::{SessionId, SessionQueueEntry, StudyDirection, StudySessionSummary};
