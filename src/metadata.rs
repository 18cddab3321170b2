//! Durable record of what has been indexed.
//!
//! [`MetadataStore`] maps document ids to their last-indexed
//! [`DocumentRecord`] and is the source of truth for staleness. Mutations
//! only touch memory and mark the store dirty; [`MetadataStore::persist`] is
//! the single point where durable state changes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{IndexError, Result};
use crate::models::{DocumentRecord, IndexMetadata, METADATA_VERSION};
use crate::persist::write_atomic;

pub struct MetadataStore {
    path: PathBuf,
    meta: IndexMetadata,
    /// id -> position in `meta.documents`.
    positions: HashMap<String, usize>,
    dirty: bool,
}

impl MetadataStore {
    /// An empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            meta: IndexMetadata::default(),
            positions: HashMap::new(),
            dirty: false,
        }
    }

    /// Read persisted metadata from `path`.
    ///
    /// Never fails: a missing file yields an empty store, and an unreadable
    /// or unparsable file yields an empty store plus a warning. A file from a
    /// newer version is read as-is but [`persist`](Self::persist) refuses to
    /// replace it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no index metadata yet, starting empty");
                return Self::new(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read index metadata, starting empty");
                return Self::new(path);
            }
        };

        let meta: IndexMetadata = match serde_json::from_slice(&bytes) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "index metadata is corrupt, starting empty");
                return Self::new(path);
            }
        };

        if meta.version > METADATA_VERSION {
            tracing::warn!(
                path = %path.display(),
                found = meta.version,
                supported = METADATA_VERSION,
                "index metadata written by a newer version; reading it, but it will not be overwritten"
            );
        }

        let mut store = Self {
            path,
            meta: IndexMetadata {
                documents: Vec::with_capacity(meta.documents.len()),
                ..meta
            },
            positions: HashMap::new(),
            dirty: false,
        };
        for record in meta.documents {
            if store.positions.contains_key(&record.id) {
                tracing::warn!(id = %record.id, "duplicate record in index metadata, keeping the first");
                store.dirty = true;
                continue;
            }
            store.positions.insert(record.id.clone(), store.meta.documents.len());
            store.meta.documents.push(record);
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.positions.get(id).map(|&pos| &self.meta.documents[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Insert `record`, or replace the record with the same id in place.
    pub fn upsert(&mut self, record: DocumentRecord) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.meta.documents[pos] = record,
            None => {
                self.positions
                    .insert(record.id.clone(), self.meta.documents.len());
                self.meta.documents.push(record);
            }
        }
        self.dirty = true;
    }

    /// Remove the record for `id`, keeping the order of the rest.
    pub fn remove(&mut self, id: &str) -> Option<DocumentRecord> {
        let pos = self.positions.remove(id)?;
        let record = self.meta.documents.remove(pos);
        for later in &self.meta.documents[pos..] {
            if let Some(p) = self.positions.get_mut(&later.id) {
                *p -= 1;
            }
        }
        self.dirty = true;
        Some(record)
    }

    /// Remove every record whose id is in `ids` in a single pass.
    ///
    /// Returns the removed ids in store order.
    pub fn remove_all(&mut self, ids: &HashSet<String>) -> Vec<String> {
        let mut removed = Vec::new();
        self.meta.documents.retain(|record| {
            if ids.contains(&record.id) {
                removed.push(record.id.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.reindex();
            self.dirty = true;
        }
        removed
    }

    fn reindex(&mut self) {
        self.positions = self
            .meta
            .documents
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id.clone(), pos))
            .collect();
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[DocumentRecord] {
        &self.meta.documents
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.meta.documents.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.meta.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.documents.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.meta.dimension
    }

    /// Record the embedding width. Only the first call has an effect.
    pub fn set_dimension(&mut self, dimension: usize) {
        if self.meta.dimension.is_none() {
            self.meta.dimension = Some(dimension);
            self.dirty = true;
        }
    }

    /// Forget the recorded width and model so the next vector fixes them anew.
    ///
    /// Only valid while the store holds no records.
    pub fn clear_embedding_space(&mut self) {
        debug_assert!(self.is_empty());
        if self.meta.dimension.is_some() || self.meta.model.is_some() {
            self.meta.dimension = None;
            self.meta.model = None;
            self.dirty = true;
        }
    }

    /// Schema version of the file this store was loaded from.
    pub fn version(&self) -> u32 {
        self.meta.version
    }

    pub fn model(&self) -> Option<&str> {
        self.meta.model.as_deref()
    }

    pub fn set_model(&mut self, model: &str) {
        if self.meta.model.as_deref() != Some(model) {
            self.meta.model = Some(model.to_string());
            self.dirty = true;
        }
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.meta.last_updated
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Fails if the file on disk belongs to a newer schema than this build
    /// writes.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.meta.version > METADATA_VERSION {
            return Err(IndexError::Configuration(format!(
                "{} was written by a newer version (schema {}, this build writes {}); refusing to overwrite it",
                self.path.display(),
                self.meta.version,
                METADATA_VERSION
            )));
        }
        Ok(())
    }

    /// Atomically write the full metadata set if anything changed.
    ///
    /// Returns `true` if a write happened.
    pub fn persist(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.ensure_writable()?;
        let previous = self.meta.last_updated;
        self.meta.version = METADATA_VERSION;
        self.meta.last_updated = Some(Utc::now());

        let written = serde_json::to_vec_pretty(&self.meta)
            .map_err(Into::into)
            .and_then(|bytes| write_atomic(&self.path, &bytes));
        if let Err(e) = written {
            self.meta.last_updated = previous;
            return Err(e);
        }

        self.dirty = false;
        tracing::debug!(path = %self.path.display(), documents = self.len(), "persisted index metadata");
        Ok(true)
    }
}
