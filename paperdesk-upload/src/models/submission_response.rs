//! Server response to a batch submission
//!
//! The same body shape is used for success and failure; every field is
//! optional on the wire so partial or unexpected bodies still decode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::upload_session::AcceptedPaper;

/// One per-file failure reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub filename: String,
    #[serde(default)]
    pub error: String,
    /// Position in the submitted batch, when the server echoes it
    #[serde(default)]
    pub index: Option<usize>,
}

/// Quota figures reported alongside a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub remaining: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionBody {
    pub papers: Vec<AcceptedPaper>,
    pub message: Option<String>,
    pub failed_files: Vec<FailedFile>,
    pub limits: Option<Limits>,
}

impl SubmissionBody {
    /// Body carrying only a message, used when the server sent something undecodable
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn reported_remaining(&self) -> Option<u32> {
        self.limits.as_ref().and_then(|l| l.remaining)
    }
}

/// HTTP status plus decoded body
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResponse {
    pub http_status: u16,
    pub body: SubmissionBody,
}

impl SubmissionResponse {
    pub fn new(http_status: u16, body: SubmissionBody) -> Self {
        Self { http_status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_body_decodes() {
        let body: SubmissionBody = serde_json::from_str(
            r#"{
                "papers": [{"id": "p-1", "title": "A", "processingProgress": 0, "pages": 12}],
                "limits": {"remaining": 2, "resetsAt": "2026-11-01"}
            }"#,
        )
        .unwrap();

        assert_eq!(body.papers.len(), 1);
        assert_eq!(body.papers[0].paper_id.as_deref(), Some("p-1"));
        assert_eq!(body.papers[0].extra["pages"], 12);
        assert_eq!(body.reported_remaining(), Some(2));
        assert!(body.limits.unwrap().extra.contains_key("resetsAt"));
        assert!(body.failed_files.is_empty());
    }

    #[test]
    fn test_failure_body_decodes() {
        let body: SubmissionBody = serde_json::from_str(
            r#"{"message": "Monthly quota exhausted", "limits": {"remaining": 0}}"#,
        )
        .unwrap();

        assert_eq!(body.message.as_deref(), Some("Monthly quota exhausted"));
        assert_eq!(body.reported_remaining(), Some(0));
        assert!(body.papers.is_empty());
    }

    #[test]
    fn test_failed_file_index_optional() {
        let body: SubmissionBody = serde_json::from_str(
            r#"{"failedFiles": [{"filename": "b.pdf", "error": "corrupt"}, {"filename": "c.pdf", "error": "too large", "index": 2}]}"#,
        )
        .unwrap();

        assert_eq!(body.failed_files[0].index, None);
        assert_eq!(body.failed_files[1].index, Some(2));
        assert_eq!(body.reported_remaining(), None);
    }
}
