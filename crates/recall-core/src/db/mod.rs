//! Database layer for Recall

mod connection;
mod migrations;
mod offline_set_repository;
mod pending_repository;
mod result_repository;
mod session_repository;

pub use connection::Database;
pub use offline_set_repository::{LibSqlOfflineSetRepository, OfflineSetRepository};
pub use pending_repository::{LibSqlPendingChangeRepository, PendingChangeRepository};
pub use result_repository::{LibSqlResultRepository, ResultRepository};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};

/// Read a non-negative counter column stored as `INTEGER`
pub(crate) fn get_count(row: &libsql::Row, index: i32) -> crate::Result<u32> {
    let value: i64 = row.get(index)?;
    Ok(u32::try_from(value.max(0)).unwrap_or(u32::MAX))
}
