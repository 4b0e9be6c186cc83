//! Card result repository implementation

use crate::error::{Error, Result};
use crate::models::{CardResult, Confidence, SessionId};
use libsql::{params, Connection};

/// Trait for card result storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ResultRepository {
    /// Append one answer
    async fn put(&self, result: &CardResult) -> Result<()>;

    /// Answers recorded for a session, in answer order
    async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<CardResult>>;

    /// Answers recorded for a card across all sessions, in answer order
    async fn list_for_card(&self, card_id: &str) -> Result<Vec<CardResult>>;

    /// Replace every answer of a session in one transaction
    async fn replace_for_session(
        &self,
        session_id: &SessionId,
        results: &[CardResult],
    ) -> Result<()>;

    /// Remove every answer of a session, returning how many were removed
    async fn delete_for_session(&self, session_id: &SessionId) -> Result<u64>;
}

/// libSQL implementation of `ResultRepository`
pub struct LibSqlResultRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlResultRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn insert(&self, result: &CardResult) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO card_results (session_id, card_id, is_correct, time_to_answer_secs, confidence, answered_at)
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

    async fn query(&self, sql: &str, key: String) -> Result<Vec<CardResult>> {
        let mut rows = self.conn.query(sql, [key]).await?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(Self::parse_result(&row)?);
        }
        Ok(results)
    }

    fn parse_result(row: &libsql::Row) -> Result<CardResult> {
        let session_id: String = row.get(0)?;
        let confidence = row
            .get::<Option<i64>>(4)?
            .and_then(|value| u8::try_from(value).ok())
            .and_then(|value| Confidence::new(value).ok());

        Ok(CardResult {
            session_id: session_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid session id '{session_id}'")))?,
            card_id: row.get(1)?,
            is_correct: row.get::<i32>(2)? != 0,
            time_to_answer_secs: row.get(3)?,
            confidence,
            answered_at: row.get(5)?,
        })
    }
}

impl ResultRepository for LibSqlResultRepository<'_> {
    async fn put(&self, result: &CardResult) -> Result<()> {
        self.insert(result).await
    }

    async fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<CardResult>> {
        self.query(
            "SELECT session_id, card_id, is_correct, time_to_answer_secs, confidence, answered_at
             FROM card_results
             WHERE session_id = ?
             ORDER BY answered_at ASC, id ASC",
            session_id.as_str(),
        )
        .await
    }

    async fn list_for_card(&self, card_id: &str) -> Result<Vec<CardResult>> {
        self.query(
            "SELECT session_id, card_id, is_correct, time_to_answer_secs, confidence, answered_at
             FROM card_results
             WHERE card_id = ?
             ORDER BY answered_at ASC, id ASC",
            card_id.to_string(),
        )
        .await
    }

    async fn replace_for_session(
        &self,
        session_id: &SessionId,
        results: &[CardResult],
    ) -> Result<()> {
        if let Some(foreign) = results.iter().find(|result| result.session_id != *session_id) {
            return Err(Error::InvalidInput(format!(
                "result for session {} cannot replace results of session {session_id}",
                foreign.session_id
            )));
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        if let Err(e) = self
            .conn
            .execute(
                "DELETE FROM card_results WHERE session_id = ?",
                [session_id.as_str()],
            )
            .await
        {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        for result in results {
            if let Err(e) = self.insert(result).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete_for_session(&self, session_id: &SessionId) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM card_results WHERE session_id = ?",
                [session_id.as_str()],
            )
            .await?;
        Ok(removed)
    }
}
