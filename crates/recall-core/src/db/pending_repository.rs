//! Pending change repository implementation

use crate::error::{Error, Result};
use crate::models::{PendingChange, PendingChangeId};
use libsql::{params, Connection};

use super::get_count;

/// Trait for pending change storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PendingChangeRepository {
    /// Store a new pending change
    async fn insert(&self, change: &PendingChange) -> Result<()>;

    /// All pending changes, oldest first. Rows that no longer parse are deleted.
    async fn list(&self) -> Result<Vec<PendingChange>>;

    /// Persist the retry counter and last error of a change
    async fn update_retry(&self, change: &PendingChange) -> Result<()>;

    /// Remove a change
    async fn delete(&self, id: &PendingChangeId) -> Result<()>;

    /// Number of pending changes
    async fn count(&self) -> Result<usize>;
}

/// libSQL implementation of `PendingChangeRepository`
pub struct LibSqlPendingChangeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlPendingChangeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_change(row: &libsql::Row) -> Result<PendingChange> {
        let id: String = row.get(0)?;
        let operation: String = row.get(1)?;
        let entity: String = row.get(2)?;
        let payload: String = row.get(4)?;

        Ok(PendingChange {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid pending change id '{id}'")))?,
            operation: operation.parse()?,
            entity: entity.parse()?,
            entity_id: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.get(5)?,
            retry_count: get_count(row, 6)?,
            last_error: row.get(7)?,
        })
    }
}

impl PendingChangeRepository for LibSqlPendingChangeRepository<'_> {
    async fn insert(&self, change: &PendingChange) -> Result<()> {
        let payload = serde_json::to_string(&change.payload)?;
        self.conn
            .execute(
                "INSERT INTO pending_changes (id, operation, entity, entity_id, payload, created_at, retry_count, last_error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    change.id.as_str(),
                    change.operation.as_str(),
                    change.entity.as_str(),
                    change.entity_id.as_str(),
                    payload,
                    change.created_at,
                    i64::from(change.retry_count),
                    change.last_error.clone()
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PendingChange>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation, entity, entity_id, payload, created_at, retry_count, last_error, rowid
                 FROM pending_changes
                 ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut changes = Vec::new();
        let mut unreadable = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_change(&row) {
                Ok(change) => changes.push(change),
                Err(error) => {
                    tracing::warn!("Dropping unreadable pending change: {error}");
                    unreadable.push(row.get::<i64>(8)?);
                }
            }
        }
        drop(rows);

        for rowid in unreadable {
            self.conn
                .execute("DELETE FROM pending_changes WHERE rowid = ?", [rowid])
                .await?;
        }
        Ok(changes)
    }

    async fn update_retry(&self, change: &PendingChange) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_changes SET retry_count = ?, last_error = ? WHERE id = ?",
                params![
                    i64::from(change.retry_count),
                    change.last_error.clone(),
                    change.id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(change.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &PendingChangeId) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_changes WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM pending_changes", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ChangeOperation, EntityKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn change(entity_id: &str, created_at: i64) -> PendingChange {
        let mut change = PendingChange::new(
            ChangeOperation::Update,
            EntityKind::Flashcard,
            entity_id,
            json!({"front": "perro", "back": "dog"}),
        );
        change.created_at = created_at;
        change
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_list_oldest_first() {
        let db = setup().await;
        let repo = LibSqlPendingChangeRepository::new(db.connection());

        let newer = change("card-2", 2_000);
        let older = change("card-1", 1_000);
        repo.insert(&newer).await.unwrap();
        repo.insert(&older).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(listed, vec![older, newer]);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_retry_persists_counter() {
        let db = setup().await;
        let repo = LibSqlPendingChangeRepository::new(db.connection());

        let mut pending = change("card-1", 1_000);
        repo.insert(&pending).await.unwrap();
        pending.register_failure("HTTP 503", 3);
        repo.update_retry(&pending).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(listed[0].retry_count, 1);
        assert_eq!(listed[0].last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_retry_missing_change() {
        let db = setup().await;
        let repo = LibSqlPendingChangeRepository::new(db.connection());

        let result = repo.update_retry(&change("card-1", 1_000)).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreadable_rows_are_removed() {
        let db = setup().await;
        let repo = LibSqlPendingChangeRepository::new(db.connection());

        let readable = change("card-1", 2_000);
        repo.insert(&readable).await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO pending_changes (id, operation, entity, entity_id, payload, created_at, retry_count, last_error)
                 VALUES ('broken', 'rename', 'flashcard', 'card-9', '{', 1000, 0, NULL)",
                (),
            )
            .await
            .unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        assert_eq!(repo.list().await.unwrap(), vec![readable.clone()]);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.list().await.unwrap(), vec![readable]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_change() {
        let db = setup().await;
        let repo = LibSqlPendingChangeRepository::new(db.connection());

        let pending = change("card-1", 1_000);
        repo.insert(&pending).await.unwrap();
        repo.delete(&pending.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
