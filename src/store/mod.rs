//! SQLite persistence: pool setup, participants, conversations and messages.
//!
//! Writes go straight to the pool. Tables are small and the only contended
//! row operation (appointment transition) is a single conditional `UPDATE`,
//! which SQLite applies atomically.

pub mod conversations;
pub mod participants;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Schema applied on every open. All statements are idempotent.
const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested participant was not found.
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt {field} value in store: {value}")]
    CorruptValue {
        /// Column or field name.
        field: &'static str,
        /// The offending stored value.
        value: String,
    },
}

/// Open (or create) the database file and apply the schema.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the database
/// cannot be opened, or the schema fails to apply.
pub async fn open(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .pragma("trusted_schema", "OFF")
        .pragma("foreign_keys", "ON");

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    migrate(&pool).await.context("failed to apply schema")?;
    info!(path = %path.display(), "database opened");
    Ok(pool)
}

/// Open a private in-memory database with the schema applied.
///
/// Uses a single connection that is never recycled, so the data lives as long
/// as the pool.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the pool cannot connect or the schema fails.
pub async fn open_in_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .pragma("foreign_keys", "ON");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Apply the bundled schema.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// Current UTC time as a sortable RFC 3339 string with microseconds.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
