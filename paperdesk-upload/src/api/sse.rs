//! Server-Sent Events for upload session changes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /upload/events
///
/// Streams every `UploadEvent`: validation, transfer progress, terminal
/// outcomes, quota updates, processing progress and resets.
pub async fn upload_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    paperdesk_common::sse::create_event_sse_stream(&state.event_bus, "paperdesk-upload")
}
