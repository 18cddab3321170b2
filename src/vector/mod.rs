//! Vector backend abstraction.
//!
//! The [`VectorBackend`] trait is the only surface the index builder and the
//! query pipeline use to store and look up vectors. Vectors are addressed by
//! the document id, never by position; a backend that stores rows densely
//! keeps its own id→slot table (see [`FlatIndex`]).
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](VectorBackend::add) | Insert or replace the vector for a key |
//! | [`remove`](VectorBackend::remove) | Drop the vector for a key |
//! | [`query`](VectorBackend::query) | k-nearest keys by ascending distance |
//! | [`rebuild`](VectorBackend::rebuild) | Recompute internal lookup structures |
//! | [`save`](VectorBackend::save) / [`load`](VectorBackend::load) | Persist the backend to its own file and read it back |
//! | [`reset`](VectorBackend::reset) | Empty the backend and change its width |

pub mod flat;

use std::path::Path;

use serde::Deserialize;

use crate::embedding::{cosine_similarity, squared_euclidean};
use crate::error::Result;

pub use flat::FlatIndex;

/// Distance function a backend is built with.
///
/// Fixed for the lifetime of the persisted index; queries always use the
/// backend's metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `1 - cosine_similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    SquaredEuclidean,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::SquaredEuclidean => squared_euclidean(a, b),
        }
    }

    /// Map a distance to a similarity where larger is closer.
    pub fn score(self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::SquaredEuclidean => 1.0 / (1.0 + distance),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::SquaredEuclidean => "squared_euclidean",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::SquaredEuclidean => 1,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::SquaredEuclidean),
            _ => None,
        }
    }
}

/// Nearest-neighbor storage keyed by document id.
pub trait VectorBackend: Send + Sync {
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &str) -> bool;

    /// All stored keys, in no particular order.
    fn keys(&self) -> Vec<String>;

    /// Insert or replace the vector stored under `key`.
    ///
    /// Fails with [`IndexError::DimensionMismatch`](crate::IndexError::DimensionMismatch)
    /// if `vector` is not [`dimension`](VectorBackend::dimension) wide.
    fn add(&mut self, key: &str, vector: &[f32]) -> Result<()>;

    /// Remove `key`. Returns `false` if it was not present.
    fn remove(&mut self, key: &str) -> bool;

    /// The `top_k` nearest keys with their distances, closest first.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<(String, f32)>>;

    /// Recompute internal lookup structures from stored data.
    fn rebuild(&mut self);

    fn save(&self, path: &Path) -> Result<()>;

    /// Read a backend written by [`save`](VectorBackend::save).
    ///
    /// Fails with [`IndexError::Storage`](crate::IndexError::Storage) if the
    /// file is missing or corrupt.
    fn load(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Drop every vector and take `dimension` as the new width.
    fn reset(&mut self, dimension: usize);
}
