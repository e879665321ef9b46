//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode enabled,
//! so the HTTP server can serve list views while uploads are written. The
//! database file and its parent directories are created automatically.
//!
//! [`create_base_tables`] provisions the version-1 layout. It runs on every
//! start and is a no-op once the tables exist; later changes are applied by
//! the [`schema`](crate::schema) coordinator.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;

/// Create a connection pool to the configured SQLite database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the version-1 tables if they do not exist.
pub async fn create_base_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host TEXT NOT NULL UNIQUE,
            last_seen INTEGER NOT NULL,
            current_report INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL UNIQUE,
            archived INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id INTEGER NOT NULL,
            file_handle INTEGER,
            status INTEGER NOT NULL,
            collection INTEGER NOT NULL,
            time INTEGER NOT NULL,
            resources_changed INTEGER NOT NULL,
            resources_failed INTEGER NOT NULL,
            resources_total INTEGER NOT NULL,
            runtime REAL NOT NULL,
            new_report INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (node_id) REFERENCES nodes(id),
            FOREIGN KEY (collection) REFERENCES collections(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reportdata (
            id INTEGER PRIMARY KEY,
            report BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schemaversion (
            id INTEGER PRIMARY KEY,
            complete INTEGER NOT NULL DEFAULT 0,
            comment TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
