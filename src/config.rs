//! TOML configuration parsing and validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::vector::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `metadata.json`, `vectors.bin` and `index.lock`.
    pub dir: PathBuf,
    #[serde(default)]
    pub metric: Metric,
}

impl IndexConfig {
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join("vectors.bin")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join("index.lock")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    #[serde(default = "default_snapshot_max_chars")]
    pub snapshot_max_chars: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    /// Write both index files after every this many batches. Each write
    /// replaces the whole files; the last batch is always written.
    #[serde(default = "default_persist_every_batches")]
    pub persist_every_batches: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_document_bytes: default_max_document_bytes(),
            snapshot_max_chars: default_snapshot_max_chars(),
            embed_timeout_secs: default_embed_timeout_secs(),
            persist_every_batches: default_persist_every_batches(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_max_document_bytes() -> usize {
    1024 * 1024
}
fn default_snapshot_max_chars() -> usize {
    8000
}
fn default_embed_timeout_secs() -> u64 {
    60
}
fn default_persist_every_batches() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_preview_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl Config {
    /// A config rooted at `dir` with every other section at its defaults.
    pub fn with_index_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                dir: dir.into(),
                metric: Metric::default(),
            },
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            corpus: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.indexing.batch_size == 0 {
        anyhow::bail!("indexing.batch_size must be > 0");
    }
    if config.indexing.embed_timeout_secs == 0 {
        anyhow::bail!("indexing.embed_timeout_secs must be > 0");
    }
    if config.indexing.persist_every_batches == 0 {
        anyhow::bail!("indexing.persist_every_batches must be > 0");
    }

    if config.retrieval.default_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.preview_chars == 0 {
        anyhow::bail!("retrieval.preview_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Local models resolve their own name and width.
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[index]\ndir = \"/tmp/idx\"\n").unwrap();
        assert_eq!(config.indexing.batch_size, 10);
        assert_eq!(config.retrieval.preview_chars, 1000);
        assert_eq!(config.index.metric, Metric::Cosine);
        assert!(!config.embedding.is_enabled());
        assert_eq!(
            config.index.metadata_path(),
            PathBuf::from("/tmp/idx/metadata.json")
        );
    }

    #[test]
    fn metric_is_parsed() {
        let config = parse(
            "[index]\ndir = \"idx\"\nmetric = \"squared_euclidean\"\n",
        )
        .unwrap();
        assert_eq!(config.index.metric, Metric::SquaredEuclidean);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = parse("[index]\ndir = \"idx\"\n[indexing]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn persist_interval_defaults_to_every_batch() {
        let config = parse("[index]\ndir = \"idx\"\n").unwrap();
        assert_eq!(config.indexing.persist_every_batches, 1);

        let err = parse("[index]\ndir = \"idx\"\n[indexing]\npersist_every_batches = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("persist_every_batches"));
    }

    #[test]
    fn enabled_provider_requires_dims_and_model() {
        let err = parse("[index]\ndir = \"idx\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let err = parse(
            "[index]\ndir = \"idx\"\n[embedding]\nprovider = \"ollama\"\ndims = 768\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[index]\ndir = \"idx\"\n[embedding]\nprovider = \"cohere\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
