//! Reconcile pipeline: brings the metadata store and the vector backend into
//! agreement with the current corpus.
//!
//! ```text
//! corpus ──▶ drift repair ──▶ change detection ──▶ batched embed ──▶ upsert ──▶ persist
//!                                  │ (sha256)          (JoinSet,        (store +    (per batch)
//!                                  ▼                    timeout)         backend)
//!                               unchanged: skipped
//! ```
//!
//! Re-running a reconcile over unchanged content issues no embedding calls
//! and writes nothing. Each batch is embedded without holding the index's
//! write guard and then applied under it, so readers never see a half-applied
//! batch. Both files are rewritten after every
//! `indexing.persist_every_batches` batches and after the last one.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::config::IndexingConfig;
use crate::embedding::{check_dimension, Embedder};
use crate::error::{IndexError, Result};
use crate::index::IndexState;
use crate::models::{
    truncate_chars, DocumentFailure, DocumentRecord, ReconcileMode, ReconcileReport,
    SourceDocument,
};
use crate::progress::{ProgressReporter, ReconcileProgress};

/// SHA-256 hex digest of a document's content.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct PendingDocument<'d> {
    doc: &'d SourceDocument,
    hash: String,
}

type EmbedOutcome = std::result::Result<Vec<f32>, String>;

/// Drives one reconcile against shared index state.
///
/// The write guard is taken only to plan and to apply each embedded batch;
/// embedding itself runs without it, so searches keep being served. Callers
/// must serialize builders against each other;
/// [`SemanticIndex`](crate::index::SemanticIndex) does this.
pub(crate) struct IndexBuilder<'a> {
    state: &'a RwLock<IndexState>,
    vectors_path: &'a Path,
    embedder: Arc<dyn Embedder>,
    config: &'a IndexingConfig,
    progress: &'a dyn ProgressReporter,
}

impl<'a> IndexBuilder<'a> {
    pub(crate) fn new(
        state: &'a RwLock<IndexState>,
        vectors_path: &'a Path,
        embedder: Arc<dyn Embedder>,
        config: &'a IndexingConfig,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            state,
            vectors_path,
            embedder,
            config,
            progress,
        }
    }

    /// Reconcile the index against `documents`.
    ///
    /// Per-document embedding failures are collected into the returned
    /// report. Configuration errors (dimension mismatch) and persist
    /// failures abort.
    pub(crate) async fn reconcile(
        self,
        documents: &[SourceDocument],
        mode: ReconcileMode,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let (dimension, pending) = {
            let mut state = self.state.write().await;
            let dimension = self.resolve_dimension(&mut state)?;
            report.repaired = repair_drift(&mut state);
            let pending = self.plan(&mut state, documents, mode, &mut report);
            state.persist(self.vectors_path)?;
            (dimension, pending)
        };

        let total = pending.len() as u64;
        self.progress.report(ReconcileProgress::Planned {
            scanned: report.scanned,
            pending: total,
        });

        let mut done = 0u64;
        let persist_every = self.config.persist_every_batches.max(1);
        let batches = pending.chunks(self.config.batch_size.max(1));
        let batch_count = batches.len();
        for (batch_no, batch) in batches.enumerate() {
            let outcomes = self.embed_batch(batch).await;

            // Validate the whole batch before applying any of it.
            for outcome in outcomes.iter().flatten() {
                check_dimension(dimension, outcome)?;
            }

            {
                let mut state = self.state.write().await;
                for (item, outcome) in batch.iter().zip(outcomes) {
                    match outcome {
                        Ok(vector) => {
                            self.apply(&mut state, item, dimension, &vector)?;
                            report.embedded += 1;
                        }
                        Err(reason) => {
                            tracing::warn!(id = %item.doc.id, error = %reason, "embedding failed");
                            report.failures.push(DocumentFailure {
                                id: item.doc.id.clone(),
                                reason,
                            });
                        }
                    }
                }
                let last = batch_no + 1 == batch_count;
                if last || (batch_no + 1) % persist_every == 0 {
                    state.persist(self.vectors_path)?;
                }
            }

            done += batch.len() as u64;
            self.progress.report(ReconcileProgress::Embedding {
                done,
                total,
                failed: report.failed(),
            });
        }

        tracing::info!(
            scanned = report.scanned,
            embedded = report.embedded,
            unchanged = report.unchanged,
            skipped = report.skipped,
            removed = report.removed,
            repaired = report.repaired,
            failed = report.failed(),
            "reconcile finished"
        );
        Ok(report)
    }

    /// The width vectors must have for this reconcile.
    ///
    /// The width is only recorded once a vector is stored, so an index that
    /// holds nothing yet adopts whatever the provider reports.
    fn resolve_dimension(&self, state: &mut IndexState) -> Result<usize> {
        let provider_dims = self.embedder.dims();
        if provider_dims == 0 {
            return Err(IndexError::Configuration(format!(
                "embedding provider '{}' reports no dimension",
                self.embedder.model_name()
            )));
        }

        let holds_vectors = !state.store.is_empty() || !state.backend.is_empty();
        match state.store.dimension() {
            Some(stored) if stored != provider_dims && holds_vectors => {
                return Err(IndexError::DimensionMismatch {
                    expected: stored,
                    actual: provider_dims,
                });
            }
            Some(stored) if stored != provider_dims => {
                tracing::info!(
                    previous = stored,
                    provider = provider_dims,
                    "index holds no vectors, adopting the provider's width"
                );
                state.store.clear_embedding_space();
            }
            _ => {}
        }

        if state.backend.dimension() != provider_dims {
            if !state.backend.is_empty() {
                return Err(IndexError::Configuration(format!(
                    "vector backend is {} wide but the index expects {}",
                    state.backend.dimension(),
                    provider_dims
                )));
            }
            state.backend.reset(provider_dims);
        }

        if let Some(model) = state.store.model() {
            if model != self.embedder.model_name() {
                tracing::warn!(
                    indexed_with = model,
                    provider = self.embedder.model_name(),
                    "embedding model changed; existing vectors are kept until their documents change"
                );
            }
        }
        Ok(provider_dims)
    }

    /// Sort `documents` into unchanged and pending, and in full mode drop
    /// everything the corpus no longer has.
    fn plan<'d>(
        &self,
        state: &mut IndexState,
        documents: &'d [SourceDocument],
        mode: ReconcileMode,
        report: &mut ReconcileReport,
    ) -> Vec<PendingDocument<'d>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut live: HashSet<&str> = HashSet::new();
        let mut pending = Vec::new();

        for doc in documents {
            if !seen.insert(doc.id.as_str()) {
                tracing::warn!(id = %doc.id, "duplicate document id in corpus, ignoring later copy");
                continue;
            }
            report.scanned += 1;

            if doc.content.len() > self.config.max_document_bytes {
                tracing::info!(
                    id = %doc.id,
                    bytes = doc.content.len(),
                    limit = self.config.max_document_bytes,
                    "document exceeds size ceiling, skipping"
                );
                report.skipped += 1;
                continue;
            }
            live.insert(doc.id.as_str());

            let hash = content_hash(&doc.content);
            match state.store.get(&doc.id) {
                Some(existing) if existing.content_hash == hash => report.unchanged += 1,
                _ => pending.push(PendingDocument { doc, hash }),
            }
        }

        if mode == ReconcileMode::Full {
            let stale: HashSet<String> = state
                .store
                .ids()
                .filter(|id| !live.contains(id))
                .map(str::to_string)
                .collect();
            for id in state.store.remove_all(&stale) {
                state.backend_dirty |= state.backend.remove(&id);
                tracing::debug!(id = %id, "removed document no longer in corpus");
                report.removed += 1;
            }
        }

        pending
    }

    /// Store one embedded document. The first stored vector fixes the
    /// index's width and model.
    fn apply(
        &self,
        state: &mut IndexState,
        item: &PendingDocument<'_>,
        dimension: usize,
        vector: &[f32],
    ) -> Result<()> {
        state.backend.add(&item.doc.id, vector)?;
        state.backend_dirty = true;
        state.store.set_dimension(dimension);
        if state.store.model().is_none() {
            state.store.set_model(self.embedder.model_name());
        }
        state.store.upsert(DocumentRecord {
            id: item.doc.id.clone(),
            content_hash: item.hash.clone(),
            last_modified: Utc::now(),
            content_snapshot: truncate_chars(&item.doc.content, self.config.snapshot_max_chars)
                .to_string(),
        });
        Ok(())
    }

    /// Embed every document of `batch` concurrently.
    ///
    /// Outcomes are returned in batch order; a failure or timeout only
    /// affects its own slot.
    async fn embed_batch(&self, batch: &[PendingDocument<'_>]) -> Vec<EmbedOutcome> {
        let timeout = Duration::from_secs(self.config.embed_timeout_secs);
        let mut tasks = JoinSet::new();

        for (slot, item) in batch.iter().enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let text = item.doc.content.clone();
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, embedder.embed(&text)).await {
                    Ok(Ok(vector)) if vector.is_empty() => {
                        Err("embedding provider returned an empty vector".to_string())
                    }
                    Ok(Ok(vector)) => Ok(vector),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "embedding timed out after {}s",
                        timeout.as_secs()
                    )),
                };
                (slot, outcome)
            });
        }

        let mut outcomes: Vec<EmbedOutcome> = (0..batch.len())
            .map(|_| Err("embedding task did not complete".to_string()))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => outcomes[slot] = outcome,
                Err(e) => tracing::error!(error = %e, "embedding task panicked"),
            }
        }
        outcomes
    }
}

/// Drop vectors with no record and records with no vector.
///
/// Records dropped here come back as new documents if they are still in the
/// corpus. Returns the number of entries removed.
fn repair_drift(state: &mut IndexState) -> u64 {
    let mut repaired = 0u64;

    for key in state.backend.keys() {
        if !state.store.contains(&key) {
            tracing::warn!(id = %key, "dropping vector with no metadata record");
            state.backend.remove(&key);
            state.backend_dirty = true;
            repaired += 1;
        }
    }

    let orphaned: HashSet<String> = state
        .store
        .ids()
        .filter(|id| !state.backend.contains(id))
        .map(str::to_string)
        .collect();
    for id in state.store.remove_all(&orphaned) {
        tracing::warn!(id = %id, "metadata record has no vector, scheduling re-embed");
        repaired += 1;
    }

    if repaired > 0 {
        state.backend.rebuild();
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_sha256_hex() {
        let h = content_hash("hello world");
        assert_eq!(
            h,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(h, content_hash("hello world"));
        assert_ne!(h, content_hash("hello world!"));
    }
}
