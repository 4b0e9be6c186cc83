//! Study session and session queue repository implementation

use crate::error::{Error, Result};
use crate::models::{SessionId, SessionQueueEntry, StudySessionSummary};
use libsql::{params, Connection};

use super::get_count;

/// Trait for session storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Insert or replace a session summary, keyed by session id
    async fn upsert(&self, session: &StudySessionSummary) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<StudySessionSummary>>;

    /// List sessions, newest first
    async fn list(&self, limit: usize) -> Result<Vec<StudySessionSummary>>;

    /// Delete a session summary
    async fn delete(&self, id: &SessionId) -> Result<()>;

    /// Queue a session for sync. Returns `false` when it was already queued.
    async fn enqueue(&self, session_id: &SessionId, set_id: &str) -> Result<bool>;

    /// Remove a session from the sync queue
    async fn dequeue(&self, session_id: &SessionId) -> Result<()>;

    /// Queued sessions, oldest first
    async fn list_queued(&self) -> Result<Vec<SessionQueueEntry>>;

    /// Record a failed delivery attempt for a queued session
    async fn record_attempt(&self, session_id: &SessionId, error: &str) -> Result<()>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_session_id(raw: &str) -> Result<SessionId> {
        raw.parse()
            .map_err(|_| Error::Database(format!("invalid session id '{raw}'")))
    }

    fn parse_session(row: &libsql::Row) -> Result<StudySessionSummary> {
        let id: String = row.get(0)?;
        let direction: String = row.get(11)?;
        Ok(StudySessionSummary {
            id: Self::parse_session_id(&id)?,
            set_id: row.get(1)?,
            set_name: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            total_cards: get_count(row, 5)?,
            correct_count: get_count(row, 6)?,
            incorrect_count: get_count(row, 7)?,
            completed_cards: get_count(row, 8)?,
            duration_secs: row.get(9)?,
            is_offline: row.get::<i32>(10)? != 0,
            direction: direction.parse().unwrap_or_default(),
            is_completed: row.get::<i32>(12)? != 0,
        })
    }

    fn parse_queue_entry(row: &libsql::Row) -> Result<SessionQueueEntry> {
        let session_id: String = row.get(0)?;
        Ok(SessionQueueEntry {
            session_id: Self::parse_session_id(&session_id)?,
            set_id: row.get(1)?,
            enqueued_at: row.get(2)?,
            attempts: get_count(row, 3)?,
            last_error: row.get(4)?,
        })
    }
}

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn upsert(&self, session: &StudySessionSummary) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO study_sessions (
                    id, set_id, set_name, started_at, ended_at, total_cards, correct_count,
                    incorrect_count, completed_cards, duration_secs, is_offline, direction, is_completed
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    set_id = excluded.set_id,
                    set_name = excluded.set_name,
                    started_at = excluded.started_at,
                    ended_at = excluded.ended_at,
                    total_cards = excluded.total_cards,
                    correct_count = excluded.correct_count,
                    incorrect_count = excluded.incorrect_count,
                    completed_cards = excluded.completed_cards,
                    duration_secs = excluded.duration_secs,
                    is_offline = excluded.is_offline,
                    direction = excluded.direction,
                    is_completed = excluded.is_completed",
                params![
                    session.id.as_str(),
                    session.set_id.as_str(),
                    session.set_name.as_str(),
                    session.started_at,
                    session.ended_at,
                    i64::from(session.total_cards),
                    i64::from(session.correct_count),
                    i64::from(session.incorrect_count),
                    i64::from(session.completed_cards),
                    session.duration_secs,
                    i32::from(session.is_offline),
                    session.direction.as_str(),
                    i32::from(session.is_completed)
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<StudySessionSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, set_id, set_name, started_at, ended_at, total_cards, correct_count,
                        incorrect_count, completed_cards, duration_secs, is_offline, direction, is_completed
                 FROM study_sessions WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<StudySessionSummary>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, set_id, set_name, started_at, ended_at, total_cards, correct_count,
                        incorrect_count, completed_cards, duration_secs, is_offline, direction, is_completed
                 FROM study_sessions
                 ORDER BY started_at DESC, id DESC
                 LIMIT ?",
                [limit],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(Self::parse_session(&row)?);
        }
        Ok(sessions)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.conn
            .execute("DELETE FROM study_sessions WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn enqueue(&self, session_id: &SessionId, set_id: &str) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO session_queue (session_id, set_id, enqueued_at, attempts)
                 VALUES (?, ?, ?, 0)
                 ON CONFLICT(session_id) DO NOTHING",
                params![
                    session_id.as_str(),
                    set_id,
                    chrono::Utc::now().timestamp_millis()
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn dequeue(&self, session_id: &SessionId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM session_queue WHERE session_id = ?",
                [session_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn list_queued(&self) -> Result<Vec<SessionQueueEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, set_id, enqueued_at, attempts, last_error
                 FROM session_queue
                 ORDER BY enqueued_at ASC, session_id ASC",
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_queue_entry(&row)?);
        }
        Ok(entries)
    }

    async fn record_attempt(&self, session_id: &SessionId, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE session_queue SET attempts = attempts + 1, last_error = ? WHERE session_id = ?",
                params![error, session_id.as_str()],
            )
            .await?;
        Ok(())
    }
}
