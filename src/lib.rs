//! # Semantic Index
//!
//! An incremental semantic index over a corpus of text documents.
//!
//! Each document is identified by a stable id. Reconciling the index against
//! the current corpus embeds only documents whose content hash changed, drops
//! documents that disappeared, and persists both halves of the index (a JSON
//! metadata store and a binary vector file) atomically. Queries embed the
//! query text and rank documents by vector distance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Corpus  │──▶│ IndexBuilder │──▶│  Metadata   │  metadata.json
//! │ (id,text)│   │ hash + embed │   │   Store     │
//! └──────────┘   └──────┬───────┘   └─────────────┘
//!                       │           ┌─────────────┐
//!                       └──────────▶│   Vector    │  vectors.bin
//!                                   │   Backend   │
//!                                   └──────┬──────┘
//!                                          ▼
//!                                   ┌─────────────┐
//!                                   │QueryPipeline│
//!                                   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`metadata`] | Per-document records, persisted as JSON |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Keyed nearest-neighbor backend |
//! | [`builder`] | Reconcile pipeline |
//! | [`search`] | Query pipeline |
//! | [`index`] | The [`SemanticIndex`] handle |
//! | [`corpus`] | Filesystem scan for the CLI |

pub mod builder;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod index_cmd;
pub mod lock;
pub mod metadata;
pub mod models;
mod persist;
pub mod progress;
pub mod search;
pub mod stats;
pub mod vector;

pub use error::{IndexError, Result};
pub use index::SemanticIndex;
