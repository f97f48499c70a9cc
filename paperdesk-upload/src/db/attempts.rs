//! Upload attempt audit trail
//!
//! One row per attempt holding its final snapshot. JSON columns keep the
//! selection summary, accepted papers, failures and transitions as observers
//! saw them.

use chrono::{DateTime, Utc};
use paperdesk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::UploadSession;

/// Stored attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: Uuid,
    /// Status name, e.g. `partially_failed`
    pub status: String,
    /// Full status including its reason
    pub status_detail: Value,
    pub file_count: i64,
    pub total_bytes: i64,
    pub files: Value,
    pub accepted_papers: Value,
    pub failed_entries: Value,
    pub transitions: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn to_json<T: Serialize>(label: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", label, e)))
}

fn from_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", label, e)))
}

fn parse_time(label: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", label, e)))
}

/// Insert or update the row for this session's attempt
pub async fn save_attempt(pool: &SqlitePool, session: &UploadSession) -> Result<()> {
    // Serialize everything before touching the pool
    let attempt_id = session.attempt_id.to_string();
    let status = session.status.name();
    let status_detail = to_json("status", &session.status)?;
    let files = to_json("selection", &session.selection)?;
    let accepted_papers = to_json("accepted papers", &session.accepted_papers)?;
    let failed_entries = to_json(
        "failed entries",
        &session.failed_entries.values().collect::<Vec<_>>(),
    )?;
    let transitions = to_json("transitions", &session.transitions)?;
    let started_at = session.started_at.to_rfc3339();
    let ended_at = session.ended_at.map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO upload_attempts (
            attempt_id, status, status_detail, file_count, total_bytes,
            files, accepted_papers, failed_entries, transitions,
            started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(attempt_id) DO UPDATE SET
            status = excluded.status,
            status_detail = excluded.status_detail,
            accepted_papers = excluded.accepted_papers,
            failed_entries = excluded.failed_entries,
            transitions = excluded.transitions,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(&attempt_id)
    .bind(status)
    .bind(&status_detail)
    .bind(session.selection.len() as i64)
    .bind(session.bytes_total as i64)
    .bind(&files)
    .bind(&accepted_papers)
    .bind(&failed_entries)
    .bind(&transitions)
    .bind(&started_at)
    .bind(&ended_at)
    .execute(pool)
    .await?;

    tracing::debug!(attempt_id = %attempt_id, status, "Upload attempt recorded");
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<AttemptRecord> {
    let attempt_id: String = row.get("attempt_id");
    let attempt_id = Uuid::parse_str(&attempt_id)
        .map_err(|e| Error::Internal(format!("Failed to parse attempt_id: {}", e)))?;

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| parse_time("ended_at", &s))
        .transpose()?;

    Ok(AttemptRecord {
        attempt_id,
        status: row.get("status"),
        status_detail: from_json("status", row.get("status_detail"))?,
        file_count: row.get("file_count"),
        total_bytes: row.get("total_bytes"),
        files: from_json("files", row.get("files"))?,
        accepted_papers: from_json("accepted papers", row.get("accepted_papers"))?,
        failed_entries: from_json("failed entries", row.get("failed_entries"))?,
        transitions: from_json("transitions", row.get("transitions"))?,
        started_at: parse_time("started_at", row.get("started_at"))?,
        ended_at,
    })
}

/// Load one attempt
pub async fn load_attempt(pool: &SqlitePool, attempt_id: Uuid) -> Result<Option<AttemptRecord>> {
    let row = sqlx::query("SELECT * FROM upload_attempts WHERE attempt_id = ?")
        .bind(attempt_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Most recent attempts first
pub async fn list_attempts(pool: &SqlitePool, limit: u32) -> Result<Vec<AttemptRecord>> {
    let rows = sqlx::query("SELECT * FROM upload_attempts ORDER BY started_at DESC LIMIT ?")
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(record_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BatchMetadata, FailureReason, FileHandle, FileSelection, SessionStatus,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn failed_session() -> UploadSession {
        let mut session = UploadSession::new(
            FileSelection::new(vec![FileHandle::new("a.pdf", vec![0; 64])]),
            BatchMetadata::default(),
        );
        session.transition_to(SessionStatus::Validating).unwrap();
        session.transition_to(SessionStatus::Submitting).unwrap();
        session.fail(FailureReason::NetworkError).unwrap();
        session
    }

    #[tokio::test]
    async fn test_save_and_load_attempt() {
        let pool = memory_pool().await;
        let session = failed_session();

        save_attempt(&pool, &session).await.unwrap();
        let record = load_attempt(&pool, session.attempt_id)
            .await
            .unwrap()
            .expect("attempt should be stored");

        assert_eq!(record.status, "failed");
        assert_eq!(record.status_detail["reason"]["kind"], "network_error");
        assert_eq!(record.file_count, 1);
        assert_eq!(record.total_bytes, 64);
        assert_eq!(record.files[0]["file"]["name"], "a.pdf");
        assert_eq!(record.transitions.as_array().unwrap().len(), 3);
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_save_twice_updates_row() {
        let pool = memory_pool().await;
        let mut session = failed_session();
        save_attempt(&pool, &session).await.unwrap();

        session.transition_to(SessionStatus::Idle).unwrap();
        save_attempt(&pool, &session).await.unwrap();

        let all = list_attempts(&pool, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, "idle");
    }

    #[tokio::test]
    async fn test_missing_attempt_is_none() {
        let pool = memory_pool().await;
        assert!(load_attempt(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
