//! Embedded-migration runner: migrations are embedded at compile time and
//! applied via a blocking task since `diesel_migrations`'
//! `MigrationHarness` is synchronous.

use diesel::{Connection, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::{PipelineError, Result};

pub const REPOSITORY_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");
pub const MAIN_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/main");

/// Apply all pending migrations to the database at `database_url`.
pub async fn run_migrations(database_url: &str, migrations: EmbeddedMigrations) -> Result<()> {
    let url = database_url.to_string();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = SqliteConnection::establish(&url)
            .map_err(|e| PipelineError::Internal(format!("connecting to {url}: {e}")))?;

        let applied = conn
            .run_pending_migrations(migrations)
            .map_err(|e| PipelineError::Internal(format!("running migrations: {e}")))?;

        for migration in &applied {
            info!("applied migration: {migration}");
        }
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("migration task panicked: {e}")))?
}
