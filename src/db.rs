//! SQLite pool setup and schema migration.
//!
//! Migrations are embedded with `include_str!` and applied on every open;
//! each statement is idempotent (`IF NOT EXISTS`).

use std::path::Path;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_patients", include_str!("../migrations/001_patients.sql")),
    ("002_sessions", include_str!("../migrations/002_sessions.sql")),
];

/// Open (or create) the database at `path` and apply migrations.
///
/// # Errors
///
/// Returns an error if the directory, pool, or migration fails.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF");

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    migrate(&pool).await?;
    info!(path = %path.display(), "database ready");
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
///
/// # Errors
///
/// Returns an error if the pool or migration fails.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("failed to open in-memory database")?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Apply every embedded migration in order.
///
/// # Errors
///
/// Returns an error naming the migration that failed.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .with_context(|| format!("failed to apply migration {name}"))?;
    }
    Ok(())
}
