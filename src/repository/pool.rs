//! Async SQLite connection access for the repository and main stores.
//!
//! Diesel's SQLite backend is synchronous; `diesel-async`'s
//! `SyncConnectionWrapper` runs each query on a blocking thread so the rest
//! of the codebase can stay `async fn` throughout.

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

use crate::error::PipelineError;

/// Run on every freshly-established connection: WAL for reader/writer
/// concurrency, a busy timeout so lock contention between workers backs off
/// instead of failing immediately, and `foreign_keys = ON` since SQLite
/// disables FK enforcement (and therefore `ON DELETE CASCADE`) by default
/// per connection.
const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 30000;
"#;

pub type DbError = diesel::result::Error;
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// A lightweight SQLite "pool" that establishes a connection per checkout.
/// `SyncConnectionWrapper` connections are cheap enough (a single SQLite
/// file handle) that real pooling would add little.
#[derive(Clone)]
pub struct DbPool {
    database_url: String,
}

impl DbPool {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    pub fn from_path(path: &std::path::Path) -> Self {
        Self::new(path.display().to_string())
    }

    pub async fn get(&self) -> Result<SqliteConn, PipelineError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| PipelineError::Internal(format!("connecting to {}: {e}", self.database_url)))?;
        conn.batch_execute(CONNECTION_PRAGMAS)
            .await
            .map_err(PipelineError::from)?;
        Ok(conn)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Run a Diesel query against a checked-out connection, mapping connection
/// failures the same way query failures are mapped.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:expr) => {{
        let mut $conn = $pool.get().await?;
        $body
    }};
}

pub use with_conn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_stores_url() {
        let pool = DbPool::new("/tmp/x.sqlite");
        assert_eq!(pool.database_url(), "/tmp/x.sqlite");
    }
}
