//! Drains locally queued work against the remote service.
//!
//! One cycle runs at a time. Cycles start on a reconnect, on the periodic
//! timer, on a manual request, or from the delayed retry after a failed cycle.
//! Pending changes drain first, then queued sessions, each oldest first.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::remote::{RemoteService, SessionSyncPayload};
use crate::config::SyncSettings;
use crate::error::RemoteError;
use crate::models::{EntityKind, PendingChange, SessionQueueEntry};
use crate::network::NetworkMonitor;
use crate::services::LocalStore;
use crate::state::SyncState;
use crate::Result;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why a queued item was removed without being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The change failed `max_change_retries` times
    RetryCeilingExceeded,
    /// The remote refused the payload
    Rejected,
}

/// What happened to one queued item during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Delivered and removed from the queue
    Applied,
    /// Nothing to deliver; removed from the queue
    Skipped,
    /// Delivery failed transiently; left queued for the next cycle
    Retry,
    /// Held back behind an earlier change to the same entity that is
    /// waiting for a retry; left queued with no attempt counted
    Deferred,
    /// Removed from the queue without being delivered
    Dropped(DropReason),
}

/// Tally of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub changes_applied: usize,
    pub changes_retried: usize,
    pub changes_dropped: usize,
    pub changes_deferred: usize,
    pub sessions_synced: usize,
    pub sessions_skipped: usize,
    pub sessions_deferred: usize,
    pub sessions_dropped: usize,
}

impl CycleReport {
    fn record_change(&mut self, step: DrainStep) {
        match step {
            DrainStep::Applied | DrainStep::Skipped => self.changes_applied += 1,
            DrainStep::Retry => self.changes_retried += 1,
            DrainStep::Deferred => self.changes_deferred += 1,
            DrainStep::Dropped(_) => self.changes_dropped += 1,
        }
    }

    fn record_session(&mut self, step: DrainStep) {
        match step {
            DrainStep::Applied => self.sessions_synced += 1,
            DrainStep::Skipped => self.sessions_skipped += 1,
            DrainStep::Retry | DrainStep::Deferred => self.sessions_deferred += 1,
            DrainStep::Dropped(_) => self.sessions_dropped += 1,
        }
    }

    /// Items that are still queued after the cycle
    pub const fn remaining(&self) -> usize {
        self.changes_retried + self.changes_deferred + self.sessions_deferred
    }

    /// Whether the cycle found nothing to do
    pub const fn is_empty(&self) -> bool {
        self.changes_applied
            + self.changes_retried
            + self.changes_dropped
            + self.changes_deferred
            + self.sessions_synced
            + self.sessions_skipped
            + self.sessions_deferred
            + self.sessions_dropped
            == 0
    }
}

/// Lifecycle notifications. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    Progress { processed: usize, remaining: usize },
    Completed(CycleReport),
    Error { message: String },
}

/// Result of a sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(CycleReport),
    /// Another cycle was already draining
    AlreadyRunning,
    Offline,
    /// The cycle as a whole failed; a delayed retry has been scheduled
    Failed(String),
}

#[derive(Default)]
struct BackgroundTasks {
    listener: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn abort_all(&mut self) {
        for handle in [self.listener.take(), self.timer.take(), self.retry.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    store: LocalStore,
    network: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteService>,
    settings: SyncSettings,
    in_progress: AtomicBool,
    retry_scheduled: AtomicBool,
    last_cycle_failed: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    tasks: Mutex<BackgroundTasks>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

/// Resets the in-progress flag on every exit path of a cycle.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles the local queues with the remote service.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        network: Arc<NetworkMonitor>,
        remote: Arc<dyn RemoteService>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                network,
                remote,
                settings,
                in_progress: AtomicBool::new(false),
                retry_scheduled: AtomicBool::new(false),
                last_cycle_failed: AtomicBool::new(false),
                events,
                tasks: Mutex::new(BackgroundTasks::default()),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, BackgroundTasks> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the reconnect listener and the periodic timer, then sync right
    /// away if already online. Calling it again is a no-op.
    pub fn initialize(&self) {
        {
            let mut tasks = self.tasks();
            if tasks.listener.is_some() {
                return;
            }

            let mut subscription = self.inner.network.subscribe();
            let weak = Arc::downgrade(&self.inner);
            tasks.listener = Some(tokio::spawn(async move {
                while let Some(state) = subscription.next().await {
                    let Some(orchestrator) = Self::from_weak(&weak) else {
                        break;
                    };
                    if state.is_online() {
                        tracing::debug!("Back online; starting sync");
                        orchestrator.request_sync();
                    }
                }
            }));

            if let Some(period) = self.inner.settings.periodic_interval {
                let weak = Arc::downgrade(&self.inner);
                tasks.timer = Some(tokio::spawn(async move {
                    let start = tokio::time::Instant::now() + period;
                    let mut ticker = tokio::time::interval_at(start, period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        let Some(orchestrator) = Self::from_weak(&weak) else {
                            break;
                        };
                        if orchestrator.inner.network.is_online() {
                            orchestrator.force_sync().await;
                        }
                    }
                }));
            }
        }

        if self.inner.network.is_online() {
            self.request_sync();
        }
    }

    /// Stop the listener, the timer and any scheduled retry.
    ///
    /// A cycle that is already draining runs to completion.
    pub fn dispose(&self) {
        self.tasks().abort_all();
        self.inner.retry_scheduled.store(false, Ordering::Release);
    }

    /// Receive lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Combined connectivity and sync status for display
    pub fn state(&self) -> SyncState {
        SyncState::resolve(
            self.inner.network.connectivity(),
            self.is_syncing(),
            self.inner.last_cycle_failed.load(Ordering::Acquire),
        )
    }

    /// Start a cycle in the background
    pub fn request_sync(&self) -> JoinHandle<SyncOutcome> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.force_sync().await })
    }

    /// Run a cycle now and report what it did.
    ///
    /// Failures of individual items are counted in the report, never returned.
    pub async fn force_sync(&self) -> SyncOutcome {
        if !self.inner.network.is_online() {
            tracing::debug!("Skipping sync while offline");
            return SyncOutcome::Offline;
        }
        if self
            .inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress");
            return SyncOutcome::AlreadyRunning;
        }
        let _guard = CycleGuard(&self.inner.in_progress);

        self.emit(SyncEvent::Started);
        match self.drain().await {
            Ok(report) => {
                self.inner.last_cycle_failed.store(false, Ordering::Release);
                if !report.is_empty() {
                    tracing::info!(
                        "Sync completed: {} changes applied, {} retried, {} held, {} dropped; {} sessions synced, {} deferred, {} dropped",
                        report.changes_applied,
                        report.changes_retried,
                        report.changes_deferred,
                        report.changes_dropped,
                        report.sessions_synced,
                        report.sessions_deferred,
                        report.sessions_dropped
                    );
                }
                self.emit(SyncEvent::Completed(report));
                SyncOutcome::Completed(report)
            }
            Err(error) => {
                self.inner.last_cycle_failed.store(true, Ordering::Release);
                let message = error.to_string();
                tracing::error!("Sync cycle failed: {message}");
                self.emit(SyncEvent::Error {
                    message: message.clone(),
                });
                self.schedule_retry();
                SyncOutcome::Failed(message)
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    fn schedule_retry(&self) {
        if self
            .inner
            .retry_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let delay = self.inner.settings.error_retry_delay;
        tracing::info!("Retrying sync in {}s", delay.as_secs_f64());
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(orchestrator) = Self::from_weak(&weak) else {
                return;
            };
            orchestrator
                .inner
                .retry_scheduled
                .store(false, Ordering::Release);
            orchestrator.force_sync().await;
        });
        self.tasks().retry = Some(handle);
    }

    async fn drain(&self) -> Result<CycleReport> {
        let store = &self.inner.store;
        let changes = store.pending_changes().await;
        let sessions = store.queued_sessions().await;
        let total = changes.len() + sessions.len();
        let mut report = CycleReport::default();
        let mut processed = 0;
        // Entities with a change still queued this cycle; later changes to
        // them must wait so the remote sees them in queue order.
        let mut blocked: HashSet<(EntityKind, String)> = HashSet::new();

        for change in changes {
            if !self.inner.network.is_online() {
                tracing::info!("Connectivity lost; stopping sync early");
                return Ok(report);
            }
            let key = (change.entity, change.entity_id.clone());
            let step = if blocked.contains(&key) {
                tracing::debug!(
                    "Holding {} {} {} behind an earlier change",
                    change.operation.as_str(),
                    change.entity.as_str(),
                    change.entity_id
                );
                DrainStep::Deferred
            } else {
                self.drain_change(change).await?
            };
            if matches!(step, DrainStep::Retry | DrainStep::Deferred) {
                blocked.insert(key);
            }
            report.record_change(step);
            processed += 1;
            self.emit(SyncEvent::Progress {
                processed,
                remaining: total - processed,
            });
        }

        for entry in sessions {
            if !self.inner.network.is_online() {
                tracing::info!("Connectivity lost; stopping sync early");
                return Ok(report);
            }
            report.record_session(self.drain_session(&entry).await?);
            processed += 1;
            self.emit(SyncEvent::Progress {
                processed,
                remaining: total - processed,
            });
        }

        Ok(report)
    }

    async fn drain_change(&self, mut change: PendingChange) -> Result<DrainStep> {
        let store = &self.inner.store;
        match self.inner.remote.apply_change(&change).await {
            Ok(()) => {
                store.delete_change(&change.id).await?;
                tracing::debug!(
                    "Applied {} {} {}",
                    change.operation.as_str(),
                    change.entity.as_str(),
                    change.entity_id
                );
                Ok(DrainStep::Applied)
            }
            Err(RemoteError::Rejected { status, message }) => {
                tracing::warn!(
                    "Dropping {} {} {}: rejected by remote ({status}): {message}",
                    change.operation.as_str(),
                    change.entity.as_str(),
                    change.entity_id
                );
                store.delete_change(&change.id).await?;
                Ok(DrainStep::Dropped(DropReason::Rejected))
            }
            Err(error) => {
                let ceiling = self.inner.settings.max_change_retries;
                if change.register_failure(error.to_string(), ceiling) {
                    tracing::warn!(
                        "Dropping {} {} {} after {} failed attempts: {error}",
                        change.operation.as_str(),
                        change.entity.as_str(),
                        change.entity_id,
                        change.retry_count
                    );
                    store.delete_change(&change.id).await?;
                    Ok(DrainStep::Dropped(DropReason::RetryCeilingExceeded))
                } else {
                    tracing::debug!(
                        "Change {} failed (attempt {}/{ceiling}): {error}",
                        change.id,
                        change.retry_count
                    );
                    store.update_change_retry(&change).await?;
                    Ok(DrainStep::Retry)
                }
            }
        }
    }

    async fn drain_session(&self, entry: &SessionQueueEntry) -> Result<DrainStep> {
        let store = &self.inner.store;
        let results = store.results_for_session(&entry.session_id).await;
        if results.is_empty() {
            tracing::debug!("Session {} has no results; dropping from queue", entry.session_id);
            store.dequeue_session(&entry.session_id).await?;
            return Ok(DrainStep::Skipped);
        }

        let payload = SessionSyncPayload {
            session_id: entry.session_id,
            set_id: entry.set_id.clone(),
            summary: store.session(&entry.session_id).await,
            results,
        };

        match self.inner.remote.sync_session(&payload).await {
            Ok(()) => {
                store.dequeue_session(&entry.session_id).await?;
                tracing::debug!(
                    "Synced session {} ({} results)",
                    entry.session_id,
                    payload.results.len()
                );
                Ok(DrainStep::Applied)
            }
            Err(RemoteError::Rejected { status, message }) => {
                tracing::warn!(
                    "Dropping session {} from queue: rejected by remote ({status}): {message}",
                    entry.session_id
                );
                store.dequeue_session(&entry.session_id).await?;
                Ok(DrainStep::Dropped(DropReason::Rejected))
            }
            Err(error) => {
                tracing::debug!(
                    "Session {} deferred after attempt {}: {error}",
                    entry.session_id,
                    entry.attempts + 1
                );
                store
                    .record_session_attempt(&entry.session_id, &error.to_string())
                    .await?;
                Ok(DrainStep::Retry)
            }
        }
    }
}
