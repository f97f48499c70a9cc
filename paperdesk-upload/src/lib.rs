//! paperdesk-upload library interface
//!
//! Upload session core (tier admission, request building, progress
//! aggregation, result reconciliation, session lifecycle) plus the HTTP
//! observer API around it.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use paperdesk_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::UploadOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Audit trail database
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Owner of the upload session
    pub orchestrator: Arc<UploadOrchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// The orchestrator must publish on `event_bus`
    pub fn new(db: SqlitePool, event_bus: EventBus, orchestrator: UploadOrchestrator) -> Self {
        Self {
            db,
            event_bus,
            orchestrator: Arc::new(orchestrator),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::upload_routes())
        .route("/upload/events", get(api::upload_event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
