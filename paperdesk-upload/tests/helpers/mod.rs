//! Test Helper Utilities
//!
//! Scripted transports, selections and orchestrator construction shared by
//! the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use paperdesk_common::events::{EventBus, UploadEvent};
use paperdesk_upload::models::{
    FileHandle, FileSelection, PolicyStore, ProcessingPercent, SubmissionBody, SubmissionResponse,
    TierPolicy, UploadSession,
};
use paperdesk_upload::services::{
    OrchestratorConfig, ProcessingStatusSource, ProgressSink, TransportError, TransportRequest,
    UploadOrchestrator, UploadTransport,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};

/// What a scripted submission ends with
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Response(u16, Value),
    NetworkError,
    Timeout,
    /// 2xx with a body that is not a submission body
    Undecodable,
}

/// One scripted submission
#[derive(Debug, Clone)]
pub struct MockReply {
    /// Percentages of the batch reported as sent, in order
    pub progress: Vec<u64>,
    /// Submission blocks here until notified
    pub release: Option<Arc<Notify>>,
    pub outcome: MockOutcome,
}

impl MockReply {
    pub fn respond(status: u16, body: Value) -> Self {
        Self {
            progress: vec![25, 50, 75, 100],
            release: None,
            outcome: MockOutcome::Response(status, body),
        }
    }

    pub fn fail(outcome: MockOutcome) -> Self {
        Self {
            progress: Vec::new(),
            release: None,
            outcome,
        }
    }

    pub fn with_progress(mut self, steps: &[u64]) -> Self {
        self.progress = steps.to_vec();
        self
    }

    pub fn held_until(mut self, release: Arc<Notify>) -> Self {
        self.release = Some(release);
        self
    }
}

/// What the transport was asked to send
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub filenames: Vec<String>,
    pub fields: Vec<(String, String)>,
    pub total_bytes: u64,
}

/// Transport replaying scripted replies in order
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new(replies: Vec<MockReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for MockTransport {
    async fn submit(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<SubmissionResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(RecordedRequest {
            filenames: request.files.iter().map(|f| f.filename.clone()).collect(),
            fields: request
                .fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            total_bytes: request.total_bytes(),
        });

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockTransport called more times than scripted");

        let total = request.total_bytes();
        for step in &reply.progress {
            progress.report(total * step / 100, total);
            tokio::task::yield_now().await;
        }

        if let Some(release) = &reply.release {
            release.notified().await;
        }

        match reply.outcome {
            MockOutcome::Response(status, body) => {
                let body: SubmissionBody =
                    serde_json::from_value(body).expect("scripted body must decode");
                Ok(SubmissionResponse::new(status, body))
            }
            MockOutcome::NetworkError => {
                Err(TransportError::Network("connection refused".to_string()))
            }
            MockOutcome::Timeout => Err(TransportError::Timeout),
            MockOutcome::Undecodable => Err(TransportError::Decode("expected value".to_string())),
        }
    }
}

/// Processing status source replaying a percentage sequence per paper
#[derive(Default)]
pub struct MockStatusSource {
    sequences: Mutex<HashMap<String, VecDeque<u8>>>,
}

impl MockStatusSource {
    pub fn new(sequences: &[(&str, &[u8])]) -> Arc<Self> {
        let sequences = sequences
            .iter()
            .map(|(id, steps)| (id.to_string(), steps.iter().copied().collect()))
            .collect();
        Arc::new(Self {
            sequences: Mutex::new(sequences),
        })
    }
}

#[async_trait]
impl ProcessingStatusSource for MockStatusSource {
    async fn processing_progress(
        &self,
        paper_id: &str,
    ) -> Result<ProcessingPercent, TransportError> {
        let mut sequences = self.sequences.lock().unwrap();
        let steps = sequences
            .get_mut(paper_id)
            .ok_or_else(|| TransportError::Network(format!("unknown paper {}", paper_id)))?;
        // Last value repeats once the sequence is exhausted
        let value = if steps.len() > 1 {
            steps.pop_front().unwrap_or(100)
        } else {
            steps.front().copied().unwrap_or(100)
        };
        Ok(ProcessingPercent::new(value))
    }
}

/// Selection of small PDFs with the given names
pub fn pdfs(names: &[&str]) -> FileSelection {
    FileSelection::new(
        names
            .iter()
            .map(|name| FileHandle::new(*name, format!("%PDF-1.7 {}", name).into_bytes()))
            .collect(),
    )
}

/// Selection of `n` distinct PDFs
pub fn numbered_pdfs(n: usize) -> FileSelection {
    FileSelection::new(
        (0..n)
            .map(|i| FileHandle::new(format!("paper-{}.pdf", i), vec![b'x'; 1024]))
            .collect(),
    )
}

pub fn free_tier(remaining: Option<u32>) -> TierPolicy {
    let policy = TierPolicy::new("free", 5).unwrap();
    match remaining {
        Some(n) => policy.with_server_remaining(n),
        None => policy,
    }
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        auto_reset_after: Duration::from_secs(60),
        processing_poll_interval: Duration::from_millis(20),
    }
}

pub fn orchestrator(transport: Arc<MockTransport>, policy: TierPolicy) -> UploadOrchestrator {
    UploadOrchestrator::new(transport, PolicyStore::new(policy), EventBus::new(100))
        .with_config(fast_config())
}

/// Success body accepting every named file
pub fn accepted_body(titles: &[&str], remaining: Option<u32>) -> Value {
    let papers: Vec<Value> = titles
        .iter()
        .enumerate()
        .map(|(i, t)| serde_json::json!({"id": format!("p-{}", i + 1), "title": t, "processingProgress": 0}))
        .collect();
    match remaining {
        Some(r) => serde_json::json!({"papers": papers, "limits": {"remaining": r}}),
        None => serde_json::json!({"papers": papers}),
    }
}

/// Single-connection in-memory database with tables created
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    paperdesk_upload::db::init_tables(&pool).await.unwrap();
    pool
}

/// Wait until the session satisfies `pred`, failing after 5 seconds
pub async fn wait_for_session<F>(rx: &mut watch::Receiver<UploadSession>, pred: F) -> UploadSession
where
    F: Fn(&UploadSession) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let session = rx.borrow_and_update();
                if pred(&*session) {
                    return session.clone();
                }
            }
            rx.changed().await.expect("session sender dropped");
        }
    })
    .await
    .expect("timed out waiting for session state")
}

/// Drain every event currently buffered
pub fn drain_events(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
