//! Query pipeline: query text → embedding → nearest neighbors → ranked results.

use anyhow::Result as AnyResult;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{check_dimension, create_embedder, EmbedError, Embedder};
use crate::error::{IndexError, Result};
use crate::index::SemanticIndex;
use crate::metadata::MetadataStore;
use crate::models::{truncate_chars, SearchHit};
use crate::vector::VectorBackend;

/// Read-only view used to answer one query.
pub struct QueryPipeline<'a> {
    store: &'a MetadataStore,
    backend: &'a dyn VectorBackend,
    embedder: &'a dyn Embedder,
    config: &'a RetrievalConfig,
}

impl<'a> QueryPipeline<'a> {
    pub fn new(
        store: &'a MetadataStore,
        backend: &'a dyn VectorBackend,
        embedder: &'a dyn Embedder,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self {
            store,
            backend,
            embedder,
            config,
        }
    }

    /// The indexed documents most similar to `query`, closest first.
    ///
    /// `top_k` is clamped to `[1, vector count]`; asking for more results
    /// than exist returns all of them.
    ///
    /// # Errors
    ///
    /// - [`IndexError::IndexNotBuilt`] if the backend holds no vectors.
    /// - [`IndexError::Provider`] if the query cannot be embedded.
    /// - [`IndexError::DimensionMismatch`] if the provider's width changed.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if self.backend.is_empty() {
            return Err(IndexError::IndexNotBuilt);
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        if vector.is_empty() {
            return Err(EmbedError::EmptyResponse.into());
        }
        check_dimension(self.backend.dimension(), &vector)?;

        let k = top_k.clamp(1, self.backend.len());
        let metric = self.backend.metric();
        let mut neighbors = self.backend.query(&vector, k)?;
        neighbors.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut hits = Vec::with_capacity(neighbors.len());
        for (id, distance) in neighbors {
            let Some(record) = self.store.get(&id) else {
                let drift = IndexError::Drift(format!("vector '{id}' has no metadata record"));
                tracing::warn!(id = %id, "{drift}; skipping result");
                continue;
            };
            hits.push(SearchHit {
                id,
                preview: truncate_chars(&record.content_snapshot, self.config.preview_chars)
                    .to_string(),
                distance,
                score: metric.score(distance),
                last_modified: record.last_modified,
            });
        }

        tracing::debug!(query, requested = top_k, returned = hits.len(), "search finished");
        Ok(hits)
    }
}

/// CLI entry point for `sidx search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> AnyResult<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let index = SemanticIndex::open(config.clone(), embedder);
    let top_k = limit.unwrap_or(config.retrieval.default_top_k);

    let hits = match index.search(query, top_k).await {
        Ok(hits) => hits,
        Err(IndexError::IndexNotBuilt) => {
            anyhow::bail!("Index has not been built yet. Run `sidx index` first.")
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.id);
        println!("    indexed: {}", hit.last_modified.format("%Y-%m-%d %H:%M"));
        println!(
            "    excerpt: \"{}\"",
            truncate_chars(hit.preview.trim(), 240).replace('\n', " ")
        );
        println!();
    }

    Ok(())
}
