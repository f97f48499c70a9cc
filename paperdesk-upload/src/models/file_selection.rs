//! Files and batch metadata chosen for one submission attempt

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque file handle: name, size and content
///
/// Content is shared, so cloning a selection or a session snapshot never
/// copies file bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FileHandle {
    name: String,
    content: Arc<[u8]>,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: Arc::from(content.into()),
        }
    }

    /// Read a file from disk, using its file name as the handle name
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, content))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn content(&self) -> &Arc<[u8]> {
        &self.content
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("size", &self.content.len())
            .finish()
    }
}

// Snapshots expose name and size only, never content
impl Serialize for FileHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FileHandle", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("size", &self.size())?;
        state.end()
    }
}

/// Per-file result, written only by the result reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FileOutcome {
    Pending,
    Accepted,
    Rejected(String),
    /// Server failure named this file only by a filename shared with other
    /// entries of the batch
    Ambiguous(String),
}

/// One file of a selection
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub client_index: usize,
    pub file: FileHandle,
    pub outcome: FileOutcome,
}

impl FileEntry {
    pub fn filename(&self) -> &str {
        self.file.name()
    }
}

/// Ordered files of one submission attempt
///
/// `client_index` is the position at construction time and never changes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FileSelection {
    entries: Vec<FileEntry>,
}

impl FileSelection {
    pub fn new(files: Vec<FileHandle>) -> Self {
        let entries = files
            .into_iter()
            .enumerate()
            .map(|(client_index, file)| FileEntry {
                client_index,
                file,
                outcome: FileOutcome::Pending,
            })
            .collect();
        Self { entries }
    }

    /// Load every path, preserving order
    pub async fn from_paths<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(FileHandle::from_path(path.as_ref()).await?);
        }
        Ok(Self::new(files))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn get(&self, client_index: usize) -> Option<&FileEntry> {
        self.entries.get(client_index)
    }

    /// Client indices of every entry with this file name
    pub fn indices_named(&self, filename: &str) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.filename() == filename)
            .map(|e| e.client_index)
            .collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.file.size()).sum()
    }

    pub(crate) fn set_outcomes(&mut self, outcomes: Vec<FileOutcome>) {
        for (entry, outcome) in self.entries.iter_mut().zip(outcomes) {
            entry.outcome = outcome;
        }
    }
}

/// Bibliographic metadata shared by every file of the batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
}
