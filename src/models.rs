//! Core data models used throughout the index.
//!
//! These types represent the documents, persisted records, and search results
//! that flow through the reconcile and query pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk schema version of [`IndexMetadata`].
pub const METADATA_VERSION: u32 = 1;

/// A document handed to the index builder by a corpus scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Stable identifier, typically a path relative to the corpus root.
    pub id: String,
    pub content: String,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// Last-indexed state of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    /// SHA-256 hex digest of the content that was embedded.
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
    /// Bounded prefix of the content, used to render results.
    pub content_snapshot: String,
}

/// The persisted metadata collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub version: u32,
    /// Embedding width, fixed by the first successful build.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Model that produced the stored vectors.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
}

impl Default for IndexMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            dimension: None,
            model: None,
            last_updated: None,
            documents: Vec::new(),
        }
    }
}

/// Whether a reconcile sees the whole corpus or only a subset of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Input is the entire corpus; documents missing from it are deleted.
    Full,
    /// Input is a subset; nothing is deleted.
    Partial,
}

/// A document that could not be embedded during a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Unique documents seen in the input.
    pub scanned: u64,
    pub embedded: u64,
    pub unchanged: u64,
    /// Documents over the size ceiling.
    pub skipped: u64,
    pub removed: u64,
    /// Orphan vectors dropped or records scheduled for re-embedding.
    pub repaired: u64,
    pub failures: Vec<DocumentFailure>,
}

impl ReconcileReport {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// True when the reconcile changed nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.embedded == 0 && self.removed == 0 && self.repaired == 0
    }
}

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    /// Snapshot truncated to the configured preview budget.
    pub preview: String,
    /// Distance under the backend's metric; smaller is closer.
    pub distance: f32,
    /// Similarity derived from `distance`; larger is closer.
    pub score: f32,
    pub last_modified: DateTime<Utc>,
}

/// The longest prefix of `text` holding at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
