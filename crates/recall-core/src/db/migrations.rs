//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;
    if version > CURRENT_VERSION {
        tracing::warn!(
            "Database schema version {version} is newer than supported version {CURRENT_VERSION}"
        );
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run `statements` in one transaction, rolling back on the first failure
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: study results, sessions and sync queues
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS card_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                card_id TEXT NOT NULL,
                is_correct INTEGER NOT NULL,
                time_to_answer_secs REAL NOT NULL,
                confidence INTEGER,
                answered_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_card_results_session ON card_results(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_card_results_card ON card_results(card_id)",
            "CREATE TABLE IF NOT EXISTS study_sessions (
                id TEXT PRIMARY KEY,
                set_id TEXT NOT NULL,
                set_name TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                total_cards INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                incorrect_count INTEGER NOT NULL DEFAULT 0,
                completed_cards INTEGER NOT NULL DEFAULT 0,
                duration_secs REAL NOT NULL DEFAULT 0,
                is_offline INTEGER NOT NULL DEFAULT 0,
                direction TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_study_sessions_started ON study_sessions(started_at DESC)",
            "CREATE TABLE IF NOT EXISTS session_queue (
                session_id TEXT PRIMARY KEY,
                set_id TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            "CREATE TABLE IF NOT EXISTS pending_changes (
                id TEXT PRIMARY KEY,
                operation TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_pending_changes_created ON pending_changes(created_at)",
        ],
    )
    .await
}

/// Migration to version 2: downloaded sets for offline study
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &["CREATE TABLE IF NOT EXISTS offline_sets (
            set_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            cards TEXT NOT NULL,
            downloaded_at INTEGER NOT NULL
        )"],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_create_all_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in [
            "card_results",
            "study_sessions",
            "session_queue",
            "pending_changes",
            "offline_sets",
        ] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }
}
