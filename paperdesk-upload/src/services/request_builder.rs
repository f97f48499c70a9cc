//! Multi-part request construction
//!
//! Transport-agnostic description of one batch submission. `HttpTransport`
//! turns it into a reqwest multipart form; tests inspect it directly.

use std::path::Path;
use std::sync::Arc;

use crate::models::{BatchMetadata, FileSelection};

/// Repeated form field carrying the files
pub const FILES_FIELD: &str = "files";

const PDF_CONTENT_TYPE: &str = "application/pdf";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// One file part
#[derive(Debug, Clone)]
pub struct FilePart {
    pub client_index: usize,
    pub filename: String,
    pub content_type: &'static str,
    pub content: Arc<[u8]>,
}

impl FilePart {
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Complete request: text fields followed by file parts in selection order
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub fields: Vec<(&'static str, String)>,
    pub files: Vec<FilePart>,
}

impl TransportRequest {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(FilePart::len).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn content_type_for(filename: &str) -> &'static str {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => PDF_CONTENT_TYPE,
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Build the request for a selection
///
/// Metadata is batch-level: one `title`/`authors`/`abstract` set for every file.
pub fn build(selection: &FileSelection, metadata: &BatchMetadata) -> TransportRequest {
    let fields = vec![
        ("title", metadata.title.clone()),
        ("authors", metadata.authors.clone()),
        ("abstract", metadata.abstract_text.clone()),
    ];

    let files = selection
        .entries()
        .iter()
        .map(|entry| FilePart {
            client_index: entry.client_index,
            filename: entry.filename().to_string(),
            content_type: content_type_for(entry.filename()),
            content: Arc::clone(entry.file.content()),
        })
        .collect();

    TransportRequest { fields, files }
}
