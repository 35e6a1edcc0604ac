//! Query modules for the external document store.
//!
//! rusqlite is synchronous, so every function here is blocking and expects
//! to be called through [`blocking`] (tokio::task::spawn_blocking) from
//! async handlers. Functions lock the shared connection internally.

pub mod calls;
pub mod conversations;
pub mod messages;
pub mod users;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::MutexGuard;
use thiserror::Error;

use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run a blocking store closure on the tokio blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Acquire the shared connection, mapping a poisoned lock to StoreError.
pub(crate) fn lock(db: &DbPool) -> Result<MutexGuard<'_, Connection>, StoreError> {
    db.lock().map_err(|_| StoreError::LockPoisoned)
}

/// Parse an RFC 3339 column value back into a UTC timestamp.
pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
