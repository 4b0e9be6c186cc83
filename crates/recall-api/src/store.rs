//! Server-side analytics store.
//!
//! Holds the authoritative copy of synced sessions, the entities clients
//! mutate, and per-card schedule state. Every write is idempotent so clients
//! can redeliver freely.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use libsql::{params, Builder, Connection, Database};
use recall_core::due::DueCardSource;
use recall_core::models::{CardResult, CardScheduleState, EntityKind, ReviewSubmission, SessionId};
use recall_core::scheduler::compute_next_review;
use recall_core::sync::SessionSyncPayload;
use recall_core::{Error, Result};
use serde::Serialize;
use tokio::sync::Mutex;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        set_id TEXT NOT NULL,
        summary TEXT,
        result_count INTEGER NOT NULL,
        synced_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        card_id TEXT NOT NULL,
        is_correct INTEGER NOT NULL,
        time_to_answer_secs REAL NOT NULL,
        confidence INTEGER,
        answered_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_session_results_session ON session_results(session_id)",
    "CREATE TABLE IF NOT EXISTS entities (
        kind TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER,
        PRIMARY KEY (kind, entity_id)
    )",
    "CREATE TABLE IF NOT EXISTS card_schedule_states (
        profile_id TEXT NOT NULL,
        set_id TEXT NOT NULL,
        card_id TEXT NOT NULL,
        correct_count INTEGER NOT NULL,
        incorrect_count INTEGER NOT NULL,
        ease_factor REAL NOT NULL,
        interval_days REAL NOT NULL,
        next_review_at INTEGER NOT NULL,
        stage INTEGER NOT NULL,
        last_reviewed_at INTEGER,
        PRIMARY KEY (profile_id, set_id, card_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_schedule_due ON card_schedule_states(profile_id, next_review_at)",
    "CREATE TABLE IF NOT EXISTS reviews (
        review_id TEXT PRIMARY KEY,
        profile_id TEXT NOT NULL,
        set_id TEXT NOT NULL,
        card_id TEXT NOT NULL,
        quality INTEGER NOT NULL,
        reviewed_at INTEGER NOT NULL
    )",
];

const SCHEDULE_COLUMNS: &str = "profile_id, set_id, card_id, correct_count, incorrect_count,
    ease_factor, interval_days, next_review_at, stage, last_reviewed_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSyncReceipt {
    pub session_id: SessionId,
    pub result_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReceipt {
    pub review_id: String,
    /// `false` when the review id had already been applied
    pub applied: bool,
    pub state: Option<CardScheduleState>,
}

pub struct AnalyticsStore {
    _db: Database,
    conn: Connection,
    // One connection. Every write holds this so none lands inside another
    // request's open transaction.
    write_lock: Mutex<()>,
}

impl AnalyticsStore {
    pub async fn open(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        for statement in SCHEMA {
            conn.execute(statement, ()).await?;
        }
        tracing::info!("Opened analytics store at {path}");
        Ok(Self {
            _db: db,
            conn,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }

    async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        Ok(())
    }

    async fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(value)
            }
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    /// Upsert the session and replace its results atomically.
    pub async fn sync_session(
        &self,
        payload: &SessionSyncPayload,
        max_results: usize,
    ) -> Result<SessionSyncReceipt> {
        if payload.set_id.trim().is_empty() {
            return Err(Error::InvalidInput("setId cannot be empty".to_string()));
        }
        if payload.results.is_empty() {
            return Err(Error::InvalidInput("results cannot be empty".to_string()));
        }
        if payload.results.len() > max_results {
            return Err(Error::InvalidInput(format!(
                "a session may carry at most {max_results} results"
            )));
        }
        if let Some(foreign) = payload
            .results
            .iter()
            .find(|result| result.session_id != payload.session_id)
        {
            return Err(Error::InvalidInput(format!(
                "result for card {} belongs to session {}",
                foreign.card_id, foreign.session_id
            )));
        }
        if let Some(summary) = &payload.summary {
            if summary.id != payload.session_id {
                return Err(Error::InvalidInput(
                    "summary id does not match sessionId".to_string(),
                ));
            }
        }

        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        let outcome = self.replace_session(payload).await;
        let receipt = self.finish(outcome).await?;
        tracing::info!(
            "Synced session {} ({} results)",
            receipt.session_id,
            receipt.result_count
        );
        Ok(receipt)
    }

    async fn replace_session(&self, payload: &SessionSyncPayload) -> Result<SessionSyncReceipt> {
        let session_id = payload.session_id.as_str();
        let summary = payload
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result_count = i64::try_from(payload.results.len())
            .map_err(|_| Error::InvalidInput("too many results".to_string()))?;

        self.conn
            .execute(
                "INSERT INTO sessions (session_id, set_id, summary, result_count, synced_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(session_id) DO UPDATE SET
                    set_id = excluded.set_id,
                    summary = COALESCE(excluded.summary, sessions.summary),
                    result_count = excluded.result_count,
                    synced_at = excluded.synced_at",
                params![
                    session_id.as_str(),
                    payload.set_id.as_str(),
                    summary,
                    result_count,
                    Utc::now().timestamp_millis()
                ],
            )
            .await?;
        self.conn
            .execute(
                "DELETE FROM session_results WHERE session_id = ?",
                [session_id.as_str()],
            )
            .await?;
        for result in &payload.results {
            self.insert_result(result).await?;
        }

        Ok(SessionSyncReceipt {
            session_id: payload.session_id,
            result_count: payload.results.len(),
        })
    }

    async fn insert_result(&self, result: &CardResult) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO session_results (session_id, card_id, is_correct, time_to_answer_secs, confidence, answered_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    result.session_id.as_str(),
                    result.card_id.as_str(),
                    i32::from(result.is_correct),
                    result.time_to_answer_secs,
                    result.confidence.map(|confidence| i32::from(confidence.get())),
                    result.answered_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Number of stored results for a session, `None` if it was never synced
    pub async fn session_result_count(&self, session_id: &SessionId) -> Result<Option<u64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT (SELECT COUNT(*) FROM session_results WHERE session_id = s.session_id)
                 FROM sessions s WHERE s.session_id = ?",
                [session_id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(u64::try_from(row.get::<i64>(0)?).unwrap_or_default())),
            None => Ok(None),
        }
    }

    /// Create or merge an entity. `merge` patches the stored JSON instead of replacing it.
    pub async fn upsert_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
        payload: &serde_json::Value,
        merge: bool,
    ) -> Result<()> {
        if entity_id.trim().is_empty() {
            return Err(Error::InvalidInput("entity id cannot be empty".to_string()));
        }
        if !payload.is_object() {
            return Err(Error::InvalidInput(format!(
                "{} payload must be a JSON object",
                kind.as_str()
            )));
        }
        if kind == EntityKind::StudySet
            && !merge
            && !payload.get("name").is_some_and(serde_json::Value::is_string)
        {
            return Err(Error::InvalidInput("study set needs a name".to_string()));
        }

        let sql = if merge {
            "INSERT INTO entities (kind, entity_id, payload, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(kind, entity_id) DO UPDATE SET
                payload = json_patch(entities.payload, excluded.payload),
                updated_at = excluded.updated_at,
                deleted_at = NULL"
        } else {
            "INSERT INTO entities (kind, entity_id, payload, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, NULL)
             ON CONFLICT(kind, entity_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at,
                deleted_at = NULL"
        };

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                sql,
                params![
                    kind.as_str(),
                    entity_id,
                    serde_json::to_string(payload)?,
                    Utc::now().timestamp_millis()
                ],
            )
            .await?;
        tracing::debug!("Upserted {} {entity_id}", kind.as_str());
        Ok(())
    }

    /// Soft-delete an entity. Returns `false` if it was already gone.
    pub async fn delete_entity(&self, kind: EntityKind, entity_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let _guard = self.write_lock.lock().await;
        let affected = self
            .conn
            .execute(
                "UPDATE entities SET deleted_at = ?, updated_at = ?
                 WHERE kind = ? AND entity_id = ? AND deleted_at IS NULL",
                params![now, now, kind.as_str(), entity_id],
            )
            .await?;
        tracing::debug!("Deleted {} {entity_id} ({affected} rows)", kind.as_str());
        Ok(affected > 0)
    }

    /// Live entity payload, `None` if missing or deleted
    pub async fn entity(&self, kind: EntityKind, entity_id: &str) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload FROM entities WHERE kind = ? AND entity_id = ? AND deleted_at IS NULL",
                params![kind.as_str(), entity_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String>(0)?)?)),
            None => Ok(None),
        }
    }

    /// Run the scheduler for one review, at most once per review id.
    pub async fn submit_review(&self, review: &ReviewSubmission) -> Result<ReviewReceipt> {
        review.validate()?;
        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        let outcome = self.apply_review(review).await;
        let receipt = self.finish(outcome).await?;
        if receipt.applied {
            tracing::debug!("Applied review {}", receipt.review_id);
        } else {
            tracing::debug!("Review {} already applied", receipt.review_id);
        }
        Ok(receipt)
    }

    async fn apply_review(&self, review: &ReviewSubmission) -> Result<ReviewReceipt> {
        let mut seen = self
            .conn
            .query(
                "SELECT 1 FROM reviews WHERE review_id = ?",
                [review.review_id.as_str()],
            )
            .await?;
        let existing = self
            .schedule_state(&review.profile_id, &review.set_id, &review.card_id)
            .await?;
        if seen.next().await?.is_some() {
            return Ok(ReviewReceipt {
                review_id: review.review_id.clone(),
                applied: false,
                state: existing,
            });
        }

        let reviewed_at = review.reviewed_at.trunc_subsecs(3);
        let mut state = existing.unwrap_or_else(|| {
            CardScheduleState::new(
                review.profile_id.as_str(),
                review.set_id.as_str(),
                review.card_id.as_str(),
                reviewed_at,
            )
        });
        let outcome = review.outcome();
        let update = compute_next_review(&state.schedule(), &outcome, reviewed_at);
        state.apply(&update, review.is_correct, reviewed_at);
        self.put_schedule_state(&state).await?;

        self.conn
            .execute(
                "INSERT INTO reviews (review_id, profile_id, set_id, card_id, quality, reviewed_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    review.review_id.as_str(),
                    review.profile_id.as_str(),
                    review.set_id.as_str(),
                    review.card_id.as_str(),
                    i32::from(outcome.quality.value()),
                    reviewed_at.timestamp_millis()
                ],
            )
            .await?;

        Ok(ReviewReceipt {
            review_id: review.review_id.clone(),
            applied: true,
            state: Some(state),
        })
    }

    pub async fn schedule_state(
        &self,
        profile_id: &str,
        set_id: &str,
        card_id: &str,
    ) -> Result<Option<CardScheduleState>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SCHEDULE_COLUMNS} FROM card_schedule_states
                     WHERE profile_id = ? AND set_id = ? AND card_id = ?"
                ),
                params![profile_id, set_id, card_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_schedule_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn put_schedule_state(&self, state: &CardScheduleState) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO card_schedule_states ({SCHEDULE_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    state.profile_id.as_str(),
                    state.set_id.as_str(),
                    state.card_id.as_str(),
                    i64::from(state.correct_count),
                    i64::from(state.incorrect_count),
                    state.ease_factor,
                    state.interval_days,
                    state.next_review_at.timestamp_millis(),
                    i64::from(state.stage),
                    state.last_reviewed_at.map(|at| at.timestamp_millis())
                ],
            )
            .await?;
        Ok(())
    }
}

fn parse_schedule_state(row: &libsql::Row) -> Result<CardScheduleState> {
    Ok(CardScheduleState {
        profile_id: row.get(0)?,
        set_id: row.get(1)?,
        card_id: row.get(2)?,
        correct_count: count(row.get(3)?),
        incorrect_count: count(row.get(4)?),
        ease_factor: row.get(5)?,
        interval_days: row.get(6)?,
        next_review_at: timestamp(row.get(7)?)?,
        stage: count(row.get(8)?),
        last_reviewed_at: row.get::<Option<i64>>(9)?.map(timestamp).transpose()?,
    })
}

fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Database(format!("invalid timestamp {millis}")))
}

#[async_trait]
impl DueCardSource for AnalyticsStore {
    async fn schedule_rows(&self, profile_id: &str) -> Result<Vec<CardScheduleState>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SCHEDULE_COLUMNS} FROM card_schedule_states
                     WHERE profile_id = ? ORDER BY next_review_at ASC"
                ),
                [profile_id],
            )
            .await?;
        let mut states = Vec::new();
        while let Some(row) = rows.next().await? {
            states.push(parse_schedule_state(&row)?);
        }
        Ok(states)
    }

    async fn set_names(&self, set_ids: &[String]) -> Result<HashMap<String, String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id, COALESCE(json_extract(payload, '$.name'), entity_id)
                 FROM entities
                 WHERE kind = ? AND deleted_at IS NULL
                   AND entity_id IN (SELECT value FROM json_each(?))",
                params![EntityKind::StudySet.as_str(), serde_json::to_string(set_ids)?],
            )
            .await?;
        let mut names = HashMap::new();
        while let Some(row) = rows.next().await? {
            names.insert(row.get::<String>(0)?, row.get::<String>(1)?);
        }
        Ok(names)
    }

    async fn delete_orphaned_rows(&self, profile_id: &str, set_ids: &[String]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .conn
            .execute(
                "DELETE FROM card_schedule_states
                 WHERE profile_id = ? AND set_id IN (SELECT value FROM json_each(?))",
                params![profile_id, serde_json::to_string(set_ids)?],
            )
            .await?;
        Ok(removed)
    }
}
