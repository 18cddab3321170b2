#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use semantic_index::config::Config;
use semantic_index::embedding::{EmbedError, Embedder};
use semantic_index::models::SourceDocument;
use semantic_index::SemanticIndex;

/// Texts containing this marker fail to embed.
pub const FAIL_MARKER: &str = "EMBEDFAIL";
/// Texts containing this marker take longer than any test timeout.
pub const SLOW_MARKER: &str = "EMBEDSLOW";
/// Texts containing this marker come back one element too wide.
pub const WIDE_MARKER: &str = "EMBEDWIDE";

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// one of `dims` buckets.
pub struct FakeEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            dims,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

fn bucket(word: &str, dims: usize) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % dims as u64) as usize
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-bow"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if text.contains(FAIL_MARKER) {
            return Err(EmbedError::ProviderUnavailable(
                "injected failure".to_string(),
            ));
        }
        if text.contains(SLOW_MARKER) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        let mut vector = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase(), self.dims)] += 1.0;
        }
        if text.contains(WIDE_MARKER) {
            vector.push(1.0);
        }
        Ok(vector)
    }
}

pub fn test_config(dir: &Path) -> Config {
    Config::with_index_dir(dir.join("index"))
}

pub fn open(config: &Config, embedder: &Arc<FakeEmbedder>) -> SemanticIndex {
    SemanticIndex::open(config.clone(), embedder.clone())
}

pub fn doc(id: &str, content: &str) -> SourceDocument {
    SourceDocument::new(id, content)
}
