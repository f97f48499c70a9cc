//! Upload session API handlers
//!
//! GET /upload/session, GET /upload/policy, POST /upload/submit,
//! POST /upload/cancel, POST /upload/reset, GET /upload/attempts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::db::attempts::{self, AttemptRecord};
use crate::error::{ApiError, ApiResult};
use crate::models::{BatchMetadata, FileHandle, FileSelection, SessionStatus, TierPolicy, UploadSession};
use crate::services::Attempt;
use crate::AppState;

const DEFAULT_ATTEMPT_LIMIT: u32 = 50;

/// POST /upload/submit request
#[derive(Debug, Deserialize)]
pub struct SubmitUploadRequest {
    /// Local file paths, in submission order
    pub files: Vec<PathBuf>,
    #[serde(flatten)]
    pub metadata: BatchMetadata,
}

/// POST /upload/submit response
#[derive(Debug, Serialize)]
pub struct SubmitUploadResponse {
    pub attempt_id: Uuid,
    pub status: SessionStatus,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// POST /upload/cancel response
#[derive(Debug, Serialize)]
pub struct CancelUploadResponse {
    pub attempt_id: Uuid,
    pub cancelled_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AttemptListQuery {
    pub limit: Option<u32>,
}

/// GET /upload/session
pub async fn get_session(State(state): State<AppState>) -> Json<UploadSession> {
    Json(state.orchestrator.snapshot())
}

/// GET /upload/policy
pub async fn get_policy(State(state): State<AppState>) -> Json<TierPolicy> {
    Json(state.orchestrator.policy())
}

/// POST /upload/submit
///
/// Returns 202 Accepted once the attempt is submitting; the outcome arrives
/// over `/upload/events`. A selection refused by admission control returns
/// 200 with the `rejected_locally` status.
pub async fn submit_upload(
    State(state): State<AppState>,
    Json(request): Json<SubmitUploadRequest>,
) -> ApiResult<(StatusCode, Json<SubmitUploadResponse>)> {
    // Refuse early rather than reading files for a doomed attempt
    if state.orchestrator.is_in_flight() {
        return Err(ApiError::Conflict("An upload is already in progress".to_string()));
    }

    let mut files = Vec::with_capacity(request.files.len());
    for path in &request.files {
        let handle = FileHandle::from_path(path).await.map_err(|e| {
            ApiError::BadRequest(format!("Cannot read {}: {}", path.display(), e))
        })?;
        files.push(handle);
    }
    let selection = FileSelection::new(files);
    let file_count = selection.len();
    let total_bytes = selection.total_bytes();

    match state.orchestrator.begin(selection, request.metadata).await? {
        Attempt::RejectedLocally(session) => Ok((
            StatusCode::OK,
            Json(SubmitUploadResponse {
                attempt_id: session.attempt_id,
                status: session.status,
                file_count,
                total_bytes,
            }),
        )),
        Attempt::Admitted(pending) => {
            let attempt_id = pending.attempt_id();
            let orchestrator = state.orchestrator.clone();
            let last_error = state.last_error.clone();

            tokio::spawn(async move {
                tracing::info!(attempt_id = %attempt_id, "Background upload task started");
                let session = orchestrator.run(pending).await;
                if let SessionStatus::Failed { reason } = &session.status {
                    *last_error.write().await = Some(format!("Upload {} failed: {}", attempt_id, reason));
                }
                tracing::info!(
                    attempt_id = %attempt_id,
                    status = session.status.name(),
                    "Background upload task finished"
                );
            });

            Ok((
                StatusCode::ACCEPTED,
                Json(SubmitUploadResponse {
                    attempt_id,
                    status: SessionStatus::Submitting,
                    file_count,
                    total_bytes,
                }),
            ))
        }
    }
}

/// POST /upload/cancel
pub async fn cancel_upload(State(state): State<AppState>) -> ApiResult<Json<CancelUploadResponse>> {
    let attempt_id = state.orchestrator.cancel()?;
    Ok(Json(CancelUploadResponse {
        attempt_id,
        cancelled_at: chrono::Utc::now(),
    }))
}

/// POST /upload/reset
///
/// User started a new selection; returns the resulting idle snapshot.
pub async fn reset_upload(State(state): State<AppState>) -> ApiResult<Json<UploadSession>> {
    state.orchestrator.reset_for_new_selection()?;
    Ok(Json(state.orchestrator.snapshot()))
}

/// GET /upload/attempts?limit=N
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptListQuery>,
) -> ApiResult<Json<Vec<AttemptRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_ATTEMPT_LIMIT);
    Ok(Json(attempts::list_attempts(&state.db, limit).await?))
}

/// GET /upload/attempts/:attempt_id
pub async fn get_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> ApiResult<Json<AttemptRecord>> {
    attempts::load_attempt(&state.db, attempt_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Upload attempt not found: {}", attempt_id)))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload/session", get(get_session))
        .route("/upload/policy", get(get_policy))
        .route("/upload/submit", post(submit_upload))
        .route("/upload/cancel", post(cancel_upload))
        .route("/upload/reset", post(reset_upload))
        .route("/upload/attempts", get(list_attempts))
        .route("/upload/attempts/:attempt_id", get(get_attempt))
}
