//! Upload transport
//!
//! `UploadTransport` sends one batch and reports cumulative bytes to a
//! `ProgressSink` while the body streams out. `HttpTransport` is the reqwest
//! implementation; tests substitute scripted transports.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use serde::Deserialize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::request_builder::{FilePart, TransportRequest, FILES_FIELD};
use crate::models::{ProcessingPercent, SubmissionBody, SubmissionResponse};

const USER_AGENT: &str = concat!("paperdesk-upload/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;

/// Transport errors (no usable response reached the client)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// Successful status with an undecodable body
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Failed to build request: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::Build(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Cumulative bytes sent for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub attempt_id: Uuid,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

/// Where a transport reports progress, tagged with the attempt it belongs to
#[derive(Debug, Clone)]
pub struct ProgressSink {
    attempt_id: Uuid,
    tx: mpsc::UnboundedSender<TransferProgress>,
}

impl ProgressSink {
    pub fn new(attempt_id: Uuid) -> (Self, mpsc::UnboundedReceiver<TransferProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { attempt_id, tx }, rx)
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Report cumulative progress; dropped silently once the attempt has ended
    pub fn report(&self, bytes_sent: u64, bytes_total: u64) {
        let _ = self.tx.send(TransferProgress {
            attempt_id: self.attempt_id,
            bytes_sent,
            bytes_total,
        });
    }
}

/// Sends a batch submission
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Returns any HTTP response, success or not; `Err` only when none arrived
    async fn submit(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<SubmissionResponse, TransportError>;
}

/// Reads server-side processing progress of accepted papers
#[async_trait]
pub trait ProcessingStatusSource: Send + Sync {
    async fn processing_progress(&self, paper_id: &str)
        -> Result<ProcessingPercent, TransportError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessingStatusBody {
    processing_progress: ProcessingPercent,
}

/// reqwest-backed transport
///
/// `POST {base_url}/papers/batch` for submissions and
/// `GET {base_url}/papers/{id}/status` for processing progress.
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn build_form(
        request: &TransportRequest,
        progress: &ProgressSink,
    ) -> Result<Form, TransportError> {
        let bytes_total = request.total_bytes();
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(*name, value.clone());
        }
        for file in &request.files {
            let part = Part::stream_with_length(
                streamed_body(file, Arc::clone(&sent), bytes_total, progress.clone()),
                file.len(),
            )
            .file_name(file.filename.clone())
            .mime_str(file.content_type)
            .map_err(|e| TransportError::Build(e.to_string()))?;
            form = form.part(FILES_FIELD, part);
        }
        Ok(form)
    }
}

fn chunk_ranges(len: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(CHUNK_SIZE)
        .map(|start| start..(start + CHUNK_SIZE).min(len))
        .collect()
}

/// File body that reports cumulative batch bytes as each chunk is pulled
fn streamed_body(
    file: &FilePart,
    sent: Arc<AtomicU64>,
    bytes_total: u64,
    progress: ProgressSink,
) -> Body {
    let content = Arc::clone(&file.content);
    let chunks = stream::iter(chunk_ranges(content.len())).map(move |range| {
        let chunk = content[range].to_vec();
        let so_far = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        progress.report(so_far, bytes_total);
        Ok::<_, std::io::Error>(chunk)
    });
    Body::wrap_stream(chunks)
}

/// Decode a response body, falling back to the HTTP reason for failures
fn decode_body(status: StatusCode, bytes: &[u8]) -> Result<SubmissionBody, TransportError> {
    let fallback_message = || {
        let text = String::from_utf8_lossy(bytes).trim().to_string();
        if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string()
        } else {
            text
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(if status.is_success() {
            SubmissionBody::default()
        } else {
            SubmissionBody::with_message(fallback_message())
        });
    }

    match serde_json::from_slice::<SubmissionBody>(bytes) {
        Ok(mut body) => {
            if !status.is_success() && body.message.is_none() {
                body.message = status.canonical_reason().map(str::to_string);
            }
            Ok(body)
        }
        Err(e) if status.is_success() => Err(TransportError::Decode(e.to_string())),
        Err(_) => Ok(SubmissionBody::with_message(fallback_message())),
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn submit(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<SubmissionResponse, TransportError> {
        let url = format!("{}/papers/batch", self.base_url);
        let form = Self::build_form(&request, &progress)?;

        tracing::debug!(
            attempt_id = %progress.attempt_id(),
            url = %url,
            files = request.file_count(),
            bytes = request.total_bytes(),
            "Sending batch submission"
        );

        let response = self
            .authorize(self.http_client.post(&url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let body = decode_body(status, &bytes)?;

        tracing::debug!(
            attempt_id = %progress.attempt_id(),
            status = status.as_u16(),
            papers = body.papers.len(),
            failed_files = body.failed_files.len(),
            "Batch submission answered"
        );

        Ok(SubmissionResponse::new(status.as_u16(), body))
    }
}

#[async_trait]
impl ProcessingStatusSource for HttpTransport {
    async fn processing_progress(
        &self,
        paper_id: &str,
    ) -> Result<ProcessingPercent, TransportError> {
        let url = format!("{}/papers/{}/status", self.base_url, paper_id);
        let response = self.authorize(self.http_client.get(&url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Network(format!(
                "Status lookup for {} returned HTTP {}",
                paper_id,
                status.as_u16()
            )));
        }

        let body: ProcessingStatusBody = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(body.processing_progress)
    }
}
