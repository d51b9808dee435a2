//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the narrow storage seam used by the
//! retrieval pipeline, so any nearest-neighbour backend can be substituted.
//! [`flat::FlatIndex`] is the built-in exhaustive implementation.
//!
//! # Lifecycle
//!
//! An index is filled with [`add`](VectorIndex::add) during ingestion, which
//! needs `&mut self`. Once ingestion ends the index is only read through
//! `&self` (typically behind an `Arc`), so the borrow checker rules out
//! mutation while searches run.
//!
//! # Metric
//!
//! Results are ordered by ascending squared Euclidean distance, ties broken
//! by insertion order.

pub mod flat;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::EntryMetadata;

pub use flat::FlatIndex;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("{vectors} vectors but {metadata} metadata entries")]
    LengthMismatch { vectors: usize, metadata: usize },
    #[error("corrupt index file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("index I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("index metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Implicit id: position in insertion order.
    pub id: usize,
    pub distance: f32,
    pub metadata: EntryMetadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension, fixed by the first `add`. `None` while empty.
    fn dims(&self) -> Option<usize>;

    /// Append entries; ids continue from the current length.
    async fn add(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<EntryMetadata>,
    ) -> Result<(), IndexError>;

    /// The `k` nearest entries to `query`, closest first.
    ///
    /// An empty index returns an empty list.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError>;

    /// Write the index file at `path` and its metadata sidecar
    /// ([`metadata_path`]).
    async fn persist(&self, path: &Path) -> Result<(), IndexError>;
}

/// Sidecar path holding entry metadata: `<path>.meta.json`.
pub fn metadata_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".meta.json");
    PathBuf::from(os)
}
