//! Reconciliation of local queues with the remote service.

mod orchestrator;
mod remote;

pub use orchestrator::{
    CycleReport, DrainStep, DropReason, SyncEvent, SyncOrchestrator, SyncOutcome,
};
pub use remote::{classify_failure, HttpRemoteService, RemoteService, SessionSyncPayload};
