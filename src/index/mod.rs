//! In-memory vector index over pre-embedded document chunks.
//!
//! An index is built once from a serialized corpus and is immutable
//! afterwards; queries are a brute-force cosine-similarity scan, which is
//! exact and adequate at the corpus sizes this system targets (thousands of
//! chunks). Reloading replaces the whole index behind an atomic `Arc` swap,
//! so in-flight queries keep the snapshot they started with.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::{RagError, Result};

/// A metadata value attached to a chunk: either text or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
}

impl std::fmt::Display for MetadataValue {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MetadataValue::Text(ref s) => write!(f, "{}", s),
            MetadataValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
        }
    }
}

/// One retrievable passage: text, its embedding, and source metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// A query match: the chunk's content plus its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("corpus contains no chunks")]
    Empty,

    #[error("malformed corpus: {0}")]
    Malformed(String),

    #[error("chunk '{id}' has embedding dimension {found}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate chunk id: {0}")]
    DuplicateId(String),
}

/// Immutable collection of embedded chunks with a precomputed norm cache.
#[derive(Debug)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    norms: Vec<f32>,
    dimension: usize,
}

impl VectorIndex {
    /// Build an index from already-deserialized chunk records.
    ///
    /// Validates that at least one chunk is present, that every embedding
    /// shares the dimensionality of the first, and that ids are unique.
    #[inline]
    pub fn from_records(chunks: Vec<Chunk>) -> std::result::Result<Self, IngestError> {
        if chunks.is_empty() {
            return Err(IngestError::Empty);
        }

        let dimension = chunks[0].embedding.len();
        if dimension == 0 {
            return Err(IngestError::Malformed(format!(
                "chunk '{}' has an empty embedding",
                chunks[0].id
            )));
        }

        let mut seen_ids = HashSet::with_capacity(chunks.len());
        let mut norms = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            if chunk.embedding.len() != dimension {
                return Err(IngestError::DimensionMismatch {
                    id: chunk.id.clone(),
                    expected: dimension,
                    found: chunk.embedding.len(),
                });
            }
            if !seen_ids.insert(chunk.id.as_str()) {
                return Err(IngestError::DuplicateId(chunk.id.clone()));
            }
            norms.push(l2_norm(&chunk.embedding));
        }
        drop(seen_ids);

        debug!(
            "Built vector index with {} chunks of dimension {}",
            chunks.len(),
            dimension
        );

        Ok(Self {
            chunks,
            norms,
            dimension,
        })
    }

    /// Parse a serialized corpus (a JSON array of chunk records) and build
    /// an index from it.
    #[inline]
    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, IngestError> {
        let chunks: Vec<Chunk> = serde_json::from_reader(reader)
            .map_err(|e| IngestError::Malformed(e.to_string()))?;
        Self::from_records(chunks)
    }

    #[inline]
    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, IngestError> {
        let chunks: Vec<Chunk> =
            serde_json::from_slice(bytes).map_err(|e| IngestError::Malformed(e.to_string()))?;
        Self::from_records(chunks)
    }

    /// Embedding dimensionality shared by every chunk in this index.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }

    /// Find the `k` most similar chunks with score at or above `threshold`.
    ///
    /// Results are sorted by descending cosine similarity; ties keep corpus
    /// insertion order. An empty result is not an error. `k == 0` and a
    /// query of the wrong dimensionality are caller bugs and reported as
    /// `InvalidArgument`.
    #[inline]
    pub fn query(&self, vector: &[f32], k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "query requires k >= 1".to_string(),
            ));
        }
        if vector.len() != self.dimension {
            return Err(RagError::InvalidArgument(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let query_norm = l2_norm(vector);

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let score = if query_norm > 0.0 && self.norms[i] > 0.0 {
                    dot(vector, &chunk.embedding) / (query_norm * self.norms[i])
                } else {
                    0.0
                };
                (i, score)
            })
            .filter(|&(_, score)| score >= threshold)
            .collect();

        // Stable sort: equal scores keep corpus insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                SearchHit {
                    chunk_id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    score,
                    metadata: chunk.metadata.clone(),
                }
            })
            .collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Named, atomically-swappable index snapshots.
///
/// Each logical store name maps to an `Arc<VectorIndex>`. Replacing a store
/// swaps the `Arc` under a short write lock; readers that already cloned the
/// previous `Arc` keep a consistent snapshot. A store name that has never
/// been loaded behaves as an empty index.
#[derive(Debug, Default)]
pub struct IndexStore {
    stores: RwLock<HashMap<String, Arc<VectorIndex>>>,
}

impl IndexStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for `name`, if one has been loaded.
    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<VectorIndex>> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.get(name).map(Arc::clone)
    }

    /// Replace the snapshot for `name`, returning the new handle.
    #[inline]
    pub fn swap(&self, name: &str, index: VectorIndex) -> Arc<VectorIndex> {
        let handle = Arc::new(index);
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        stores.insert(name.to_string(), Arc::clone(&handle));
        info!(
            "Index store '{}' now holds {} chunks (dimension {})",
            name,
            handle.len(),
            handle.dimension()
        );
        handle
    }

    /// Parse and load a corpus into `name`.
    ///
    /// On ingest failure the previously loaded snapshot (if any) is left
    /// untouched.
    #[inline]
    pub fn load_from_reader<R: Read>(&self, name: &str, reader: R) -> Result<Arc<VectorIndex>> {
        let index = VectorIndex::from_reader(reader)?;
        Ok(self.swap(name, index))
    }
}
