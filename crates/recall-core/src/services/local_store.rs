//! Thread-safe facade over the on-device study database.
//!
//! Writes that fail surface as [`Error::StorageUnavailable`] so callers can
//! warn that progress may not be saved. Reads never fail: an unreadable
//! collection is logged and treated as empty.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlOfflineSetRepository, LibSqlPendingChangeRepository, LibSqlResultRepository,
    LibSqlSessionRepository, OfflineSetRepository, PendingChangeRepository, ResultRepository,
    SessionRepository,
};
use crate::models::{
    CardResult, OfflineSet, PendingChange, PendingChangeId, SessionId, SessionQueueEntry,
    StudySessionSummary,
};
use crate::{Error, Result};

/// Most recent sessions returned by [`LocalStore::sessions`]
const SESSION_LIST_LIMIT: usize = 500;

/// Named collections held by the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Results,
    Sessions,
    SessionQueue,
    PendingChanges,
    OfflineSets,
}

impl Collection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Sessions => "sessions",
            Self::SessionQueue => "session_queue",
            Self::PendingChanges => "pending_changes",
            Self::OfflineSets => "offline_sets",
        }
    }

    const fn table(self) -> &'static str {
        match self {
            Self::Results => "card_results",
            Self::Sessions => "study_sessions",
            Self::SessionQueue => "session_queue",
            Self::PendingChanges => "pending_changes",
            Self::OfflineSets => "offline_sets",
        }
    }
}

/// Thread-safe service for local study storage.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh one created.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable ({}); starting fresh",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent().filter(|parent| parent.exists()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local DB file {}", path.display());
            }
        }

        Ok(())
    }

    async fn reopen_after_corruption(&self) -> Result<bool> {
        let Some(db_path) = self.db_path.clone() else {
            return Ok(false);
        };

        tracing::warn!(
            "Detected invalid local DB file; attempting to reopen connection at {}",
            db_path.display()
        );

        let mut db = self.db.lock().await;
        let placeholder = Database::open_in_memory().await?;
        drop(std::mem::replace(&mut *db, placeholder));

        Self::quarantine_corrupted_db_files(&db_path)?;
        *db = Database::open(&db_path).await?;
        Ok(true)
    }

    /// Run `op` against the connection, reopening once if the file turned out corrupted.
    async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let first_attempt = {
            let db = self.db.lock().await;
            op(db.connection().clone()).await
        };

        match first_attempt {
            Err(error) if Self::is_corrupted_db_error(&error) => {
                if self.reopen_after_corruption().await? {
                    let db = self.db.lock().await;
                    op(db.connection().clone()).await
                } else {
                    Err(error)
                }
            }
            other => other,
        }
    }

    async fn write<T, F, Fut>(&self, collection: Collection, op: F) -> Result<T>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.with_connection(op).await.map_err(|error| {
            tracing::error!("Write to {} failed: {}", collection.as_str(), error);
            match error {
                Error::StorageUnavailable(_) => error,
                other => Error::StorageUnavailable(other.to_string()),
            }
        })
    }

    async fn read<T, F, Fut>(&self, collection: Collection, op: F) -> T
    where
        T: Default,
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.with_connection(op).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Read from {} failed, treating as empty: {}", collection.as_str(), error);
                T::default()
            }
        }
    }

    /// Append one card answer.
    pub async fn put_result(&self, result: &CardResult) -> Result<()> {
        self.write(Collection::Results, |conn| async move {
            LibSqlResultRepository::new(&conn).put(result).await
        })
        .await
    }

    /// Answers recorded for a session.
    pub async fn results_for_session(&self, session_id: &SessionId) -> Vec<CardResult> {
        self.read(Collection::Results, |conn| async move {
            LibSqlResultRepository::new(&conn)
                .list_for_session(session_id)
                .await
        })
        .await
    }

    /// Answers recorded for a card across sessions.
    pub async fn results_for_card(&self, card_id: &str) -> Vec<CardResult> {
        self.read(Collection::Results, |conn| async move {
            LibSqlResultRepository::new(&conn).list_for_card(card_id).await
        })
        .await
    }

    /// Replace every answer of a session atomically.
    pub async fn replace_results(&self, session_id: &SessionId, results: &[CardResult]) -> Result<()> {
        self.write(Collection::Results, |conn| async move {
            LibSqlResultRepository::new(&conn)
                .replace_for_session(session_id, results)
                .await
        })
        .await
    }

    /// Remove every answer of a session.
    pub async fn delete_results(&self, session_id: &SessionId) -> Result<u64> {
        self.write(Collection::Results, |conn| async move {
            LibSqlResultRepository::new(&conn)
                .delete_for_session(session_id)
                .await
        })
        .await
    }

    /// Insert or replace a session summary.
    pub async fn put_session(&self, session: &StudySessionSummary) -> Result<()> {
        self.write(Collection::Sessions, |conn| async move {
            LibSqlSessionRepository::new(&conn).upsert(session).await
        })
        .await
    }

    /// Fetch a session summary.
    pub async fn session(&self, session_id: &SessionId) -> Option<StudySessionSummary> {
        self.read(Collection::Sessions, |conn| async move {
            LibSqlSessionRepository::new(&conn).get(session_id).await
        })
        .await
    }

    /// Recent session summaries, newest first.
    pub async fn sessions(&self) -> Vec<StudySessionSummary> {
        self.read(Collection::Sessions, |conn| async move {
            LibSqlSessionRepository::new(&conn)
                .list(SESSION_LIST_LIMIT)
                .await
        })
        .await
    }

    /// Delete a session summary.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<()> {
        self.write(Collection::Sessions, |conn| async move {
            LibSqlSessionRepository::new(&conn).delete(session_id).await
        })
        .await
    }

    /// Queue a session for sync. Returns `false` when it was already queued.
    pub async fn enqueue_session(&self, session_id: &SessionId, set_id: &str) -> Result<bool> {
        self.write(Collection::SessionQueue, |conn| async move {
            LibSqlSessionRepository::new(&conn)
                .enqueue(session_id, set_id)
                .await
        })
        .await
    }

    /// Remove a session from the sync queue.
    pub async fn dequeue_session(&self, session_id: &SessionId) -> Result<()> {
        self.write(Collection::SessionQueue, |conn| async move {
            LibSqlSessionRepository::new(&conn).dequeue(session_id).await
        })
        .await
    }

    /// Sessions waiting for sync, oldest first.
    pub async fn queued_sessions(&self) -> Vec<SessionQueueEntry> {
        self.read(Collection::SessionQueue, |conn| async move {
            LibSqlSessionRepository::new(&conn).list_queued().await
        })
        .await
    }

    /// Record a failed delivery attempt for a queued session.
    pub async fn record_session_attempt(&self, session_id: &SessionId, error: &str) -> Result<()> {
        self.write(Collection::SessionQueue, |conn| async move {
            LibSqlSessionRepository::new(&conn)
                .record_attempt(session_id, error)
                .await
        })
        .await
    }

    /// Store a pending change.
    pub async fn put_change(&self, change: &PendingChange) -> Result<()> {
        self.write(Collection::PendingChanges, |conn| async move {
            LibSqlPendingChangeRepository::new(&conn).insert(change).await
        })
        .await
    }

    /// Pending changes, oldest first.
    pub async fn pending_changes(&self) -> Vec<PendingChange> {
        self.read(Collection::PendingChanges, |conn| async move {
            LibSqlPendingChangeRepository::new(&conn).list().await
        })
        .await
    }

    /// Persist a change's retry counter and last error.
    pub async fn update_change_retry(&self, change: &PendingChange) -> Result<()> {
        self.write(Collection::PendingChanges, |conn| async move {
            LibSqlPendingChangeRepository::new(&conn)
                .update_retry(change)
                .await
        })
        .await
    }

    /// Remove a pending change.
    pub async fn delete_change(&self, id: &PendingChangeId) -> Result<()> {
        self.write(Collection::PendingChanges, |conn| async move {
            LibSqlPendingChangeRepository::new(&conn).delete(id).await
        })
        .await
    }

    /// Insert or replace a downloaded set.
    pub async fn put_offline_set(&self, set: &OfflineSet) -> Result<()> {
        self.write(Collection::OfflineSets, |conn| async move {
            LibSqlOfflineSetRepository::new(&conn).put(set).await
        })
        .await
    }

    /// Fetch a downloaded set.
    pub async fn offline_set(&self, set_id: &str) -> Option<OfflineSet> {
        self.read(Collection::OfflineSets, |conn| async move {
            LibSqlOfflineSetRepository::new(&conn).get(set_id).await
        })
        .await
    }

    /// All downloaded sets.
    pub async fn offline_sets(&self) -> Vec<OfflineSet> {
        self.read(Collection::OfflineSets, |conn| async move {
            LibSqlOfflineSetRepository::new(&conn).list().await
        })
        .await
    }

    /// Remove a downloaded set.
    pub async fn delete_offline_set(&self, set_id: &str) -> Result<()> {
        self.write(Collection::OfflineSets, |conn| async move {
            LibSqlOfflineSetRepository::new(&conn).delete(set_id).await
        })
        .await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> usize {
        self.read(collection, |conn| async move {
            let mut rows = conn
                .query(&format!("SELECT COUNT(*) FROM {}", collection.table()), ())
                .await?;
            let count: i64 = match rows.next().await? {
                Some(row) => row.get(0)?,
                None => 0,
            };
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(sql, ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeOperation, EntityKind, OfflineCard, StudyDirection};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn session() -> StudySessionSummary {
        StudySessionSummary::new("set-1", "Spanish", StudyDirection::default(), true)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_session_and_results_roundtrip() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let session = session();
        store.put_session(&session).await.unwrap();
        store
            .put_result(&CardResult::new(session.id, "card-1", true, 2.0, None).unwrap())
            .await
            .unwrap();

        assert_eq!(store.session(&session.id).await, Some(session.clone()));
        assert_eq!(store.results_for_session(&session.id).await.len(), 1);
        assert_eq!(store.count(Collection::Results).await, 1);
        assert_eq!(store.count(Collection::Sessions).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn counts_every_collection() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let session = session();
        store.enqueue_session(&session.id, &session.set_id).await.unwrap();
        store
            .put_change(&PendingChange::new(
                ChangeOperation::Delete,
                EntityKind::Folder,
                "folder-1",
                json!(null),
            ))
            .await
            .unwrap();
        store
            .put_offline_set(&OfflineSet::new(
                "set-1",
                "Spanish",
                vec![OfflineCard {
                    id: "card-1".to_string(),
                    front: "perro".to_string(),
                    back: "dog".to_string(),
                }],
            ))
            .await
            .unwrap();

        assert_eq!(store.count(Collection::SessionQueue).await, 1);
        assert_eq!(store.count(Collection::PendingChanges).await, 1);
        assert_eq!(store.count(Collection::OfflineSets).await, 1);
        assert_eq!(store.count(Collection::Results).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_reads_degrade_to_empty() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let session = session();
        store.put_session(&session).await.unwrap();
        store.execute_raw("DROP TABLE study_sessions").await.unwrap();
        store.execute_raw("DROP TABLE pending_changes").await.unwrap();

        assert_eq!(store.session(&session.id).await, None);
        assert!(store.sessions().await.is_empty());
        assert!(store.pending_changes().await.is_empty());
        assert_eq!(store.count(Collection::Sessions).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_writes_map_to_storage_unavailable() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.execute_raw("DROP TABLE card_results").await.unwrap();

        let result = CardResult::new(SessionId::new(), "card-1", true, 1.0, None).unwrap();
        let error = store.put_result(&result).await.unwrap_err();
        assert!(matches!(error, Error::StorageUnavailable(_)));
        assert!(error.to_string().contains("progress may not be saved"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_work_survives_restart() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("recall.db");
        let session = session();

        {
            let store = LocalStore::open_path(&db_path).await.unwrap();
            store.put_session(&session).await.unwrap();
            store.enqueue_session(&session.id, &session.set_id).await.unwrap();
            store
                .put_result(&CardResult::new(session.id, "card-1", false, 7.5, None).unwrap())
                .await
                .unwrap();
        }

        let reopened = LocalStore::open_path(&db_path).await.unwrap();
        let queued = reopened.queued_sessions().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].session_id, session.id);
        assert_eq!(reopened.results_for_session(&session.id).await.len(), 1);
        assert_eq!(reopened.path(), Some(db_path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_quarantines_corrupted_file() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("recall.db");
        std::fs::write(&db_path, vec![b'x'; 4096]).unwrap();
        std::fs::write(tmp.path().join("recall.db-wal"), b"wal").unwrap();

        let store = LocalStore::open_path(&db_path).await.unwrap();
        assert_eq!(store.count(Collection::Sessions).await, 0);
        store.put_session(&session()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|name| name.starts_with("recall.db.corrupt-")));
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("recall.db");
        let wal_path = tmp.path().join("recall.db-wal");
        let shm_path = tmp.path().join("recall.db-shm");

        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();
        std::fs::write(&shm_path, b"shm").unwrap();

        LocalStore::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        assert!(!shm_path.exists());
    }

    #[test]
    fn detects_corrupted_db_errors() {
        assert!(LocalStore::is_corrupted_db_error(&Error::Database(
            "SQLite failure: file is not a database".to_string()
        )));
        assert!(!LocalStore::is_corrupted_db_error(&Error::InvalidInput(
            "card id cannot be empty".to_string()
        )));
    }
}
