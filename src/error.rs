//! Error taxonomy for the index.
//!
//! Fatal errors ([`IndexError::Configuration`], [`IndexError::DimensionMismatch`],
//! [`IndexError::Storage`]) abort the operation that raised them. Provider
//! failures during a reconcile never surface here; they are collected per
//! document into a [`ReconcileReport`](crate::models::ReconcileReport).

use std::path::PathBuf;

use thiserror::Error;

use crate::embedding::EmbedError;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Missing credentials, unknown provider, invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The embedder returned a vector whose width differs from the index.
    #[error("Embedding dimension mismatch: index expects {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Provider(#[from] EmbedError),

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index has not been built yet; run `sidx index` first")]
    IndexNotBuilt,

    /// Store and backend disagree about which documents exist.
    #[error("Index drift: {0}")]
    Drift(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must abort a whole reconcile rather than a single document.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IndexError::Provider(_) | IndexError::Drift(_))
    }
}
