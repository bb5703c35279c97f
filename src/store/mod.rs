// =============================================================================
// store/mod.rs — THE DURABLE STORE
// =============================================================================
//
// One SQLite file, one connection pool, one place that knows how domain
// structs map onto rows. Every other module reaches the database only
// through `Store`'s methods — nobody else writes SQL.
//
// Multi-row writes that must be all-or-nothing (ingestion's filing + section
// + diff + counter update) go through a single `sqlx::Transaction` inside
// the relevant method rather than leaking transaction handles to callers.
// =============================================================================

mod companies;
mod diffs_sections;
mod jobs;
mod watch_alerts;

use crate::error::{CoreError, CoreResult};
use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct Store {
    pool: sqlx::SqlitePool,
}

impl Store {
    /// Connects to the database, creating the file if it doesn't exist, and
    /// runs embedded migrations.
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let mut opts = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CoreError::Internal(format!("bad database url: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal);
        opts = opts.disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to connect to store: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CoreError::Internal(format!("migration failed: {e}")))?;

        info!(url = %database_url, "durable store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> CoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}
