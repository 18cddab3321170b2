//! The index handle: the only way callers mutate or query an index.
//!
//! [`SemanticIndex`] owns the metadata store, the vector backend and the
//! embedder. A reconcile holds the on-disk [`IndexWriteLock`] for its whole
//! duration but takes the in-process write guard only to plan and to apply
//! each embedded batch. Searches take the read guard, so they never observe
//! a half-applied batch, and they are not blocked while the provider is
//! embedding.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> semantic_index::Result<()> {
//! use semantic_index::config::Config;
//! use semantic_index::embedding::create_embedder;
//! use semantic_index::models::{ReconcileMode, SourceDocument};
//! use semantic_index::progress::NoProgress;
//! use semantic_index::SemanticIndex;
//!
//! let config = Config::with_index_dir("./data/index");
//! let embedder = create_embedder(&config.embedding)?;
//! let index = SemanticIndex::open(config, embedder);
//!
//! let docs = vec![SourceDocument::new("a.md", "hello world")];
//! let report = index.reconcile(&docs, ReconcileMode::Full, &NoProgress).await?;
//! println!("{} embedded, {} failed", report.embedded, report.failed());
//!
//! for hit in index.search("hello", 5).await? {
//!     println!("{} {:.3}", hit.id, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::builder::IndexBuilder;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::lock::IndexWriteLock;
use crate::metadata::MetadataStore;
use crate::models::{DocumentRecord, ReconcileMode, ReconcileReport, SearchHit, SourceDocument};
use crate::progress::ProgressReporter;
use crate::search::QueryPipeline;
use crate::vector::{FlatIndex, VectorBackend};

/// The two halves of an index plus the backend's unsaved-changes flag.
pub(crate) struct IndexState {
    pub(crate) store: MetadataStore,
    pub(crate) backend: Box<dyn VectorBackend>,
    pub(crate) backend_dirty: bool,
}

impl IndexState {
    /// Load both halves from disk, falling back to empty state on any problem.
    pub(crate) fn load(config: &Config, provider_dims: usize) -> Self {
        let store = MetadataStore::load(config.index.metadata_path());
        let vectors_path = config.index.vectors_path();

        // Without a recorded dimension the store holds no records, so any
        // vectors on disk are orphans.
        let Some(dimension) = store.dimension() else {
            return Self {
                store,
                backend: Box::new(FlatIndex::new(provider_dims, config.index.metric)),
                backend_dirty: false,
            };
        };

        let backend = match FlatIndex::load(&vectors_path) {
            Ok(index) if index.dimension() != dimension => {
                tracing::warn!(
                    path = %vectors_path.display(),
                    found = index.dimension(),
                    expected = dimension,
                    "vector index width disagrees with metadata, discarding vectors"
                );
                FlatIndex::new(dimension, config.index.metric)
            }
            Ok(index) => {
                if index.metric() != config.index.metric {
                    tracing::warn!(
                        built_with = index.metric().as_str(),
                        configured = config.index.metric.as_str(),
                        "index.metric differs from the persisted index; delete the index directory to rebuild"
                    );
                }
                index
            }
            Err(IndexError::Storage { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                FlatIndex::new(dimension, config.index.metric)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot load vector index, starting empty");
                FlatIndex::new(dimension, config.index.metric)
            }
        };

        Self {
            store,
            backend: Box::new(backend),
            backend_dirty: false,
        }
    }

    /// Vectors first, then metadata: a crash in between leaves vectors
    /// without records, which the next drift repair drops.
    pub(crate) fn persist(&mut self, vectors_path: &Path) -> Result<()> {
        if self.backend_dirty || self.store.is_dirty() {
            self.store.ensure_writable()?;
        }
        if self.backend_dirty {
            self.backend.save(vectors_path)?;
            self.backend_dirty = false;
        }
        self.store.persist()?;
        Ok(())
    }
}

/// Summary of an index for `sidx stats`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub model: Option<String>,
    pub metric: &'static str,
    pub last_updated: Option<DateTime<Utc>>,
    pub metadata_bytes: u64,
    pub vectors_bytes: u64,
}

/// Disagreement between the metadata store and the vector backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Vectors whose key has no metadata record.
    pub orphan_vectors: Vec<String>,
    /// Records with no vector.
    pub missing_vectors: Vec<String>,
}

impl DriftReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_vectors.is_empty() && self.missing_vectors.is_empty()
    }
}

pub struct SemanticIndex {
    config: Config,
    embedder: Arc<dyn Embedder>,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
}

impl SemanticIndex {
    /// Open the index described by `config`.
    ///
    /// Missing or corrupt files are not errors; the index starts empty and
    /// the next reconcile rebuilds it.
    pub fn open(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let state = IndexState::load(&config, embedder.dims());
        Self {
            config,
            embedder,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the index into agreement with `documents`.
    ///
    /// Serialized against other reconciles in this process and, through the
    /// lock file, in other processes. State is re-read from disk once the
    /// lock is held, and restored from disk if the reconcile fails. Searches
    /// are served while documents are being embedded.
    pub async fn reconcile(
        &self,
        documents: &[SourceDocument],
        mode: ReconcileMode,
        progress: &dyn ProgressReporter,
    ) -> Result<ReconcileReport> {
        let _writer = self.writer.lock().await;
        let _lock = IndexWriteLock::acquire(&self.config.index.lock_path()).await?;
        self.reload().await;

        let vectors_path = self.config.index.vectors_path();
        let outcome = IndexBuilder::new(
            &self.state,
            &vectors_path,
            Arc::clone(&self.embedder),
            &self.config.indexing,
            progress,
        )
        .reconcile(documents, mode)
        .await;

        if let Err(e) = &outcome {
            tracing::error!(error = %e, "reconcile aborted, restoring last persisted state");
            self.reload().await;
        }
        outcome
    }

    async fn reload(&self) {
        let fresh = IndexState::load(&self.config, self.embedder.dims());
        *self.state.write().await = fresh;
    }

    /// The `top_k` indexed documents most similar to `query`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.read().await;
        QueryPipeline::new(
            &state.store,
            state.backend.as_ref(),
            self.embedder.as_ref(),
            &self.config.retrieval,
        )
        .search(query, top_k)
        .await
    }

    pub async fn get_document(&self, id: &str) -> Option<DocumentRecord> {
        self.state.read().await.store.get(id).cloned()
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        let file_len = |path: std::path::PathBuf| {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        };
        IndexStats {
            documents: state.store.len(),
            vectors: state.backend.len(),
            dimension: state.store.dimension(),
            model: state.store.model().map(str::to_string),
            metric: state.backend.metric().as_str(),
            last_updated: state.store.last_updated(),
            metadata_bytes: file_len(self.config.index.metadata_path()),
            vectors_bytes: file_len(self.config.index.vectors_path()),
        }
    }

    /// Compare record ids with backend keys.
    pub async fn verify(&self) -> DriftReport {
        let state = self.state.read().await;
        let keys: HashSet<String> = state.backend.keys().into_iter().collect();

        let mut orphan_vectors: Vec<String> = keys
            .iter()
            .filter(|k| !state.store.contains(k))
            .cloned()
            .collect();
        orphan_vectors.sort();

        let missing_vectors: Vec<String> = state
            .store
            .ids()
            .filter(|id| !keys.contains(*id))
            .map(str::to_string)
            .collect();

        DriftReport {
            orphan_vectors,
            missing_vectors,
        }
    }
}
