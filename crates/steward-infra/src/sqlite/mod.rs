//! SQLite storage layer.
//!
//! Split reader/writer pools in WAL mode plus the long-term memory store and
//! the retry queue store built on them.

pub mod long_term;
pub mod pool;
pub mod retry;

pub use long_term::SqliteLongTermStore;
pub use pool::DatabasePool;
pub use retry::SqliteRetryStore;

use chrono::{DateTime, SecondsFormat, Utc};
use steward_types::error::RepositoryError;

// ---------------------------------------------------------------------------
// Helpers shared by the SQLite stores
// ---------------------------------------------------------------------------

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let url = pool::database_url_for(dir.path());
    // Keep the directory alive for the duration of the test process.
    std::mem::forget(dir);
    DatabasePool::new(&url).await.unwrap()
}
