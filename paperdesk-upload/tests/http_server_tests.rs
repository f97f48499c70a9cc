//! HTTP observer API tests
//!
//! Requests are driven through the router with `oneshot`; the orchestrator
//! behind it uses a scripted transport.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use helpers::*;
use http_body_util::BodyExt;
use paperdesk_common::events::EventBus;
use paperdesk_upload::models::{PolicyStore, SessionStatus};
use paperdesk_upload::services::UploadOrchestrator;
use paperdesk_upload::{build_router, AppState};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: AppState,
    dir: TempDir,
}

impl TestApp {
    async fn new(replies: Vec<MockReply>) -> Self {
        let pool = memory_pool().await;
        let event_bus = EventBus::new(100);
        let orchestrator = UploadOrchestrator::new(
            MockTransport::new(replies),
            PolicyStore::new(free_tier(Some(5))),
            event_bus.clone(),
        )
        .with_history(pool.clone())
        .with_config(fast_config());

        let state = AppState::new(pool, event_bus, orchestrator);
        Self {
            router: build_router(state.clone()),
            state,
            dir: TempDir::new().unwrap(),
        }
    }

    fn write_pdfs(&self, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = self.dir.path().join(format!("paper-{}.pdf", i));
                std::fs::write(&path, format!("%PDF-1.7 paper {}", i)).unwrap();
                path
            })
            .collect()
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new(Vec::new()).await;

    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "paperdesk-upload");
    assert_eq!(body["upload_in_flight"], false);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_session_starts_idle() {
    let app = TestApp::new(Vec::new()).await;

    let (status, body) = app.get("/upload/session").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "idle");
    assert_eq!(body["attempt_id"], uuid::Uuid::nil().to_string());
    assert_eq!(body["progress_percent"], 0);
}

#[tokio::test]
async fn test_policy_endpoint() {
    let app = TestApp::new(Vec::new()).await;

    let (status, body) = app.get("/upload/policy").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tierName"], "free");
    assert_eq!(body["maxFilesPerBatch"], 5);
    assert_eq!(body["remaining"], 5);
}

#[tokio::test]
async fn test_submit_unreadable_file_is_bad_request() {
    let app = TestApp::new(Vec::new()).await;
    let missing = app.dir.path().join("missing.pdf");

    let (status, body) = app
        .post("/upload/submit", json!({"files": [missing]}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("missing.pdf"));
}

#[tokio::test]
async fn test_submit_runs_in_background() {
    let app = TestApp::new(vec![MockReply::respond(
        200,
        accepted_body(&["paper 0", "paper 1"], Some(4)),
    )])
    .await;
    let files = app.write_pdfs(2);
    let mut rx = app.state.orchestrator.subscribe();

    let (status, body) = app
        .post(
            "/upload/submit",
            json!({"files": files, "title": "Batch", "authors": "", "abstract": ""}),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"]["state"], "submitting");
    assert_eq!(body["file_count"], 2);

    let attempt_id: uuid::Uuid = serde_json::from_value(body["attempt_id"].clone()).unwrap();
    let done = wait_for_session(&mut rx, |s| s.attempt_id == attempt_id && s.is_terminal()).await;
    assert_eq!(done.status, SessionStatus::Succeeded);

    let (_, policy) = app.get("/upload/policy").await;
    assert_eq!(policy["remaining"], 4);

    let (_, session) = app.get("/upload/session").await;
    assert_eq!(session["accepted_papers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_submit_over_limit_rejected_locally() {
    let app = TestApp::new(Vec::new()).await;
    let files = app.write_pdfs(6);

    let (status, body) = app.post("/upload/submit", json!({"files": files})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "rejected_locally");
    assert_eq!(body["status"]["reason"]["kind"], "exceeds_batch_limit");
    assert_eq!(body["file_count"], 6);
}

#[tokio::test]
async fn test_submit_while_in_flight_conflicts() {
    let release = Arc::new(Notify::new());
    let app = TestApp::new(vec![MockReply::respond(
        200,
        accepted_body(&["paper 0"], None),
    )
    .held_until(release.clone())])
    .await;
    let files = app.write_pdfs(1);
    let mut rx = app.state.orchestrator.subscribe();

    let (status, first) = app.post("/upload/submit", json!({"files": files})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = app.post("/upload/submit", json!({"files": files})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, health) = app.get("/health").await;
    assert_eq!(health["upload_in_flight"], true);

    release.notify_one();
    let done = wait_for_session(&mut rx, |s| s.is_terminal()).await;
    assert_eq!(done.attempt_id.to_string(), first["attempt_id"]);
}

#[tokio::test]
async fn test_cancel_in_flight_upload() {
    let release = Arc::new(Notify::new());
    let app = TestApp::new(vec![MockReply::respond(
        200,
        accepted_body(&["paper 0"], None),
    )
    .held_until(release)])
    .await;
    let files = app.write_pdfs(1);

    let (_, submitted) = app.post("/upload/submit", json!({"files": files})).await;

    let (status, body) = app.post("/upload/cancel", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempt_id"], submitted["attempt_id"]);

    let (_, session) = app.get("/upload/session").await;
    assert_eq!(session["status"]["state"], "idle");
}

#[tokio::test]
async fn test_cancel_without_upload_conflicts() {
    let app = TestApp::new(Vec::new()).await;

    let (status, body) = app.post("/upload/cancel", json!({})).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "No upload in progress");
}

#[tokio::test]
async fn test_reset_after_failure() {
    let app = TestApp::new(vec![MockReply::fail(MockOutcome::NetworkError)]).await;
    let files = app.write_pdfs(1);
    let mut rx = app.state.orchestrator.subscribe();

    app.post("/upload/submit", json!({"files": files})).await;
    wait_for_session(&mut rx, |s| s.is_terminal()).await;

    let (status, body) = app.post("/upload/reset", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["state"], "idle");
}

#[tokio::test]
async fn test_attempt_history_endpoints() {
    let app = TestApp::new(Vec::new()).await;
    let files = app.write_pdfs(6);

    let (_, submitted) = app.post("/upload/submit", json!({"files": files})).await;

    let (status, list) = app.get("/upload/attempts?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["status"], "rejected_locally");

    let uri = format!(
        "/upload/attempts/{}",
        submitted["attempt_id"].as_str().unwrap()
    );
    let (status, record) = app.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["file_count"], 6);

    let uri = format!("/upload/attempts/{}", uuid::Uuid::new_v4());
    let (status, body) = app.get(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
