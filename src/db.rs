//! SQLite connection setup.
//!
//! The schema is applied inline via `include_str!` every time a pool is
//! opened; every statement is `IF NOT EXISTS`, so reopening is harmless.

use std::path::Path;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

const SCHEMA: &str = include_str!("../migrations/001_schema.sql");

/// Open (or create) the database at `path` and apply the schema.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the database
/// cannot be opened, or the migration fails.
pub async fn open(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    apply_schema(&pool).await?;
    debug!(path = %path.display(), "database ready");
    Ok(pool)
}

/// Open a private in-memory database with the schema applied.
///
/// Limited to one connection: each SQLite in-memory connection is its own
/// database.
///
/// # Errors
///
/// Returns an error if the pool cannot be created or the migration fails.
pub async fn open_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("failed to open in-memory database")?;
    apply_schema(&pool).await?;
    Ok(pool)
}

/// Apply the bundled schema to an existing pool.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub async fn apply_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply mailcast schema")?;
    Ok(())
}
