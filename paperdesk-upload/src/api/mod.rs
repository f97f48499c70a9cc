//! HTTP API handlers for paperdesk-upload
//!
//! Observer surface over the upload orchestrator: JSON snapshots, commands
//! and an SSE event stream.

pub mod health;
pub mod sse;
pub mod upload;

pub use health::health_routes;
pub use sse::upload_event_stream;
pub use upload::upload_routes;
