//! Upload event payload types
//!
//! Flat, serializable views of session data carried by `UploadEvent`s.

use serde::{Deserialize, Serialize};

/// Accepted paper as reported to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedPaperInfo {
    /// Server paper identifier, when the server provided one
    pub paper_id: Option<String>,
    /// Paper title
    pub title: String,
    /// Server-side processing progress (0-100), unrelated to transfer progress
    pub processing_percent: u8,
}

/// Per-file failure as reported to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntryInfo {
    /// Position in the selection, when the failure could be tied to one entry
    pub client_index: Option<usize>,
    /// File name reported by the server
    pub filename: String,
    /// Human-readable reason
    pub reason: String,
}
