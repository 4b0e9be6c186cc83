//! Offline set repository implementation

use crate::error::Result;
use crate::models::OfflineSet;
use libsql::{params, Connection};

/// Trait for downloaded set storage operations (async)
#[allow(async_fn_in_trait)]
pub trait OfflineSetRepository {
    /// Insert or replace a downloaded set
    async fn put(&self, set: &OfflineSet) -> Result<()>;

    /// Get a downloaded set by its set id
    async fn get(&self, set_id: &str) -> Result<Option<OfflineSet>>;

    /// All downloaded sets, most recently downloaded first
    async fn list(&self) -> Result<Vec<OfflineSet>>;

    /// Remove a downloaded set
    async fn delete(&self, set_id: &str) -> Result<()>;
}

/// libSQL implementation of `OfflineSetRepository`
pub struct LibSqlOfflineSetRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOfflineSetRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_set(row: &libsql::Row) -> Result<OfflineSet> {
        let cards: String = row.get(2)?;
        Ok(OfflineSet {
            set_id: row.get(0)?,
            name: row.get(1)?,
            cards: serde_json::from_str(&cards)?,
            downloaded_at: row.get(3)?,
        })
    }
}

impl OfflineSetRepository for LibSqlOfflineSetRepository<'_> {
    async fn put(&self, set: &OfflineSet) -> Result<()> {
        let cards = serde_json::to_string(&set.cards)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO offline_sets (set_id, name, cards, downloaded_at) VALUES (?, ?, ?, ?)",
                params![set.set_id.as_str(), set.name.as_str(), cards, set.downloaded_at],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, set_id: &str) -> Result<Option<OfflineSet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT set_id, name, cards, downloaded_at FROM offline_sets WHERE set_id = ?",
                [set_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_set(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<OfflineSet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT set_id, name, cards, downloaded_at FROM offline_sets ORDER BY downloaded_at DESC",
                (),
            )
            .await?;

        let mut sets = Vec::new();
        while let Some(row) = rows.next().await? {
            sets.push(Self::parse_set(&row)?);
        }
        Ok(sets)
    }

    async fn delete(&self, set_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM offline_sets WHERE set_id = ?", [set_id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OfflineCard;
    use pretty_assertions::assert_eq;

    fn spanish() -> OfflineSet {
        OfflineSet::new(
            "set-1",
            "Spanish",
            vec![
                OfflineCard {
                    id: "card-1".to_string(),
                    front: "perro".to_string(),
                    back: "dog".to_string(),
                },
                OfflineCard {
                    id: "card-2".to_string(),
                    front: "gato".to_string(),
                    back: "cat".to_string(),
                },
            ],
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_and_replace() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOfflineSetRepository::new(db.connection());

        let mut set = spanish();
        repo.put(&set).await.unwrap();
        assert_eq!(repo.get("set-1").await.unwrap(), Some(set.clone()));

        set.name = "Spanish basics".to_string();
        set.cards.pop();
        repo.put(&set).await.unwrap();

        let loaded = repo.get("set-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Spanish basics");
        assert_eq!(loaded.cards.len(), 1);
        assert_eq!(loaded.card("card-1").map(|card| card.back.as_str()), Some("dog"));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_set() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlOfflineSetRepository::new(db.connection());

        repo.put(&spanish()).await.unwrap();
        repo.delete("set-1").await.unwrap();
        assert!(repo.get("set-1").await.unwrap().is_none());
        assert!(repo.list().await.unwrap().is_empty());
    }
}
