//! Exhaustive in-memory [`VectorIndex`].
//!
//! Every search scans all stored vectors. This is the right trade-off for
//! per-document indexes of a few hundred chunks.
//!
//! # File format
//!
//! The index file is little-endian binary:
//!
//! ```text
//! b"CCVX" | version: u32 | dims: u32 | count: u64 | count × dims × f32
//! ```
//!
//! Entry metadata lives in a JSON sidecar next to it. Floats are written
//! bit-for-bit, so a reloaded index answers every query exactly as the
//! original did.

use async_trait::async_trait;
use std::path::Path;

use super::{metadata_path, IndexError, SearchHit, VectorIndex};
use crate::embedding::{blob_to_vec, l2_distance_sq, vec_to_blob};
use crate::models::EntryMetadata;

const MAGIC: &[u8; 4] = b"CCVX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dims: Option<usize>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<EntryMetadata>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index written by [`VectorIndex::persist`].
    pub async fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let meta_path = metadata_path(path);
        let meta_bytes = tokio::fs::read(&meta_path)
            .await
            .map_err(|source| IndexError::Io {
                path: meta_path.clone(),
                source,
            })?;
        let metadata: Vec<EntryMetadata> = serde_json::from_slice(&meta_bytes)?;

        let corrupt = |reason: &str| IndexError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing header"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| corrupt("entry count does not fit in memory"))?;
        let expected_len = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("payload length overflows"))?;

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected_len {
            return Err(corrupt("payload length does not match header"));
        }
        if metadata.len() != count {
            return Err(IndexError::LengthMismatch {
                vectors: count,
                metadata: metadata.len(),
            });
        }

        let vectors: Vec<Vec<f32>> = if dims == 0 {
            vec![Vec::new(); count]
        } else {
            payload.chunks_exact(dims * 4).map(blob_to_vec).collect()
        };

        Ok(Self {
            dims: if count == 0 { None } else { Some(dims) },
            vectors,
            metadata,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let dims = self.dims.unwrap_or(0);
        let mut out = Vec::with_capacity(HEADER_LEN + self.vectors.len() * dims * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for v in &self.vectors {
            out.extend_from_slice(&vec_to_blob(v));
        }
        out
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn add(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<EntryMetadata>,
    ) -> Result<(), IndexError> {
        if vectors.len() != metadata.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        let expected = match (self.dims, vectors.first()) {
            (Some(d), _) => d,
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(()),
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }

        self.dims = Some(expected);
        self.vectors.extend(vectors);
        self.metadata.extend(metadata);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let dims = match self.dims {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if query.len() != dims {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| (id, l2_distance_sq(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, distance)| SearchHit {
                id,
                distance,
                metadata: self.metadata[id].clone(),
            })
            .collect())
    }

    async fn persist(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| IndexError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        tokio::fs::write(path, self.encode())
            .await
            .map_err(|source| IndexError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let meta_path = metadata_path(path);
        let meta = serde_json::to_vec_pretty(&self.metadata)?;
        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|source| IndexError::Io {
                path: meta_path.clone(),
                source,
            })?;
        Ok(())
    }
}
