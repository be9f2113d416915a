//! Database access for roomsort-engine
//!
//! One SQLite file holds the image records, the shared rate-limit budget and
//! the durable workflow executions.

pub mod executions;
pub mod images;
pub mod rate_budget;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

pub use images::ImageWriter;
pub use rate_budget::SqliteBudgetStore;

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create roomsort tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            request_id TEXT NOT NULL,
            image_id TEXT NOT NULL,
            image_type TEXT NOT NULL,
            resized INTEGER NOT NULL DEFAULT 0,
            classification TEXT NOT NULL DEFAULT 'None',
            confidence REAL NOT NULL DEFAULT 0,
            tries INTEGER NOT NULL DEFAULT 0,
            service TEXT NOT NULL DEFAULT '',
            cost REAL NOT NULL DEFAULT 0,
            processing_time_ms INTEGER NOT NULL DEFAULT 0,
            resized_on TEXT,
            PRIMARY KEY (request_id, image_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_images_resized_on ON images (resized_on, request_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_budget (
            window_key TEXT PRIMARY KEY,
            used INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_executions (
            execution_id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            state TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            wake_at INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            ended_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_executions_due ON workflow_executions (status, wake_at)",
    )
    .execute(pool)
    .await?;

    // At most one running execution per request
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_running_request ON workflow_executions (request_id) WHERE status = 'RUNNING'",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (images, rate_budget, workflow_executions)");

    Ok(())
}
