//! Database access for paperdesk-upload
//!
//! SQLite audit trail of upload attempts in `paperdesk.db` under the root folder.

pub mod attempts;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the database file and its parent directory if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create paperdesk-upload tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_attempts (
            attempt_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            status_detail TEXT NOT NULL,
            file_count INTEGER NOT NULL,
            total_bytes INTEGER NOT NULL,
            files TEXT NOT NULL DEFAULT '[]',
            accepted_papers TEXT NOT NULL DEFAULT '[]',
            failed_entries TEXT NOT NULL DEFAULT '[]',
            transitions TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_upload_attempts_started_at ON upload_attempts (started_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (upload_attempts)");

    Ok(())
}
