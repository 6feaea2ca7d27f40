//! Department-sharded in-memory vector store.
//!
//! One logical shard per department, each holding the chunk vectors together
//! with their text and metadata for locality. The whole structure is built
//! once from on-disk index artifacts and is read-only afterwards, so request
//! tasks share it through an `Arc` with no locking.
//!
//! Two read paths exist:
//!
//! - [`VectorStore::search`]: top-k cosine scan within one shard. Scores are
//!   shard-local hints; callers merging across shards or query variants must
//!   re-rank through [`VectorStore::lookup`].
//! - [`VectorStore::lookup`]: the embedding lookup (`chunk_id → vector,
//!   content, metadata`) used by the re-ranker and RBAC re-checks.

use rustc_hash::FxHashMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use chrono::{DateTime, Utc};

/// Errors raised while constructing or querying the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The chunks file and the embeddings matrix disagree on row count.
    #[error("index artifacts misaligned: {records} chunk records but {vectors} vectors")]
    RowCountMismatch {
        /// Rows in the chunks file.
        records: usize,
        /// Rows in the embeddings matrix.
        vectors: usize,
    },

    /// A stored vector does not match the declared dimension.
    #[error("chunk '{chunk_id}' has dimension {actual}, store declares {expected}")]
    DimensionMismatch {
        /// Offending chunk.
        chunk_id: String,
        /// Declared store dimension.
        expected: usize,
        /// Actual vector length.
        actual: usize,
    },

    /// Two chunk records share an id; the lookup must be 1:1.
    #[error("duplicate chunk id '{chunk_id}' in index artifacts")]
    DuplicateChunkId {
        /// The repeated id.
        chunk_id: String,
    },

    /// A query vector of the wrong dimension reached the store.
    #[error("query vector has dimension {actual}, store declares {expected}")]
    QueryDimensionMismatch {
        /// Declared store dimension.
        expected: usize,
        /// Query vector length.
        actual: usize,
    },
}

/// Sidecar record describing one chunk's provenance and access rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Stable chunk identifier, 1:1 with the chunk itself.
    pub chunk_id: String,
    /// Human-readable source file identifier.
    pub source_document: String,
    /// Canonical lowercase department name.
    pub department: String,
    /// Ordinal of the chunk within its source document.
    pub chunk_index: usize,
    /// Canonical role names allowed to read this chunk; empty means the
    /// department permission rule alone decides.
    #[serde(default, deserialize_with = "deserialize_role_set")]
    pub allowed_roles: Vec<String>,
    /// Canonical role names denied even when `allowed_roles` matches.
    #[serde(default, deserialize_with = "deserialize_role_set")]
    pub explicit_deny: Vec<String>,
    /// Descriptive classification label; not consulted by access checks.
    #[serde(default)]
    pub security_level: String,
    /// Ingestion timestamp.
    pub created_at: DateTime<Utc>,
}

/// A chunk together with its metadata, as serialized in the chunks file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable chunk identifier.
    pub chunk_id: String,
    /// Normalized chunk text; presented verbatim in citations.
    pub content: String,
    /// Token count as measured by the ingestion tokenizer.
    pub token_count: usize,
    /// Sidecar metadata.
    pub metadata: ChunkMetadata,
}

/// A single shard search result.
#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity in `[-1, 1]`. Shard-local; re-ranked before return.
    pub similarity: f32,
}

/// Borrowed view over a chunk returned by the embedding lookup.
#[derive(Clone, Copy, Debug)]
pub struct ChunkEntry<'a> {
    pub vector: &'a [f32],
    pub record: &'a ChunkRecord,
}

/// Aggregate counts exposed for health reporting.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub per_department: BTreeMap<String, usize>,
}

#[derive(Debug)]
struct StoredChunk {
    record: ChunkRecord,
    vector: Vec<f32>,
}

/// The department-sharded index. Immutable after construction.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    chunks: Vec<StoredChunk>,
    by_id: FxHashMap<String, usize>,
    shards: FxHashMap<String, Vec<usize>>,
}

impl VectorStore {
    /// Assemble a store from parallel record and vector arrays.
    ///
    /// Rows must be aligned: `vectors[i]` is the embedding of `records[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on row misalignment, dimension mismatch, or
    /// duplicate chunk ids.
    pub fn from_records(
        records: Vec<ChunkRecord>,
        vectors: Vec<Vec<f32>>,
        dimension: usize,
    ) -> Result<Self, StoreError> {
        if records.len() != vectors.len() {
            return Err(StoreError::RowCountMismatch {
                records: records.len(),
                vectors: vectors.len(),
            });
        }

        let mut chunks = Vec::with_capacity(records.len());
        let mut by_id = FxHashMap::default();
        let mut shards: FxHashMap<String, Vec<usize>> = FxHashMap::default();

        for (record, vector) in records.into_iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    chunk_id: record.chunk_id.clone(),
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            let idx = chunks.len();
            if by_id.insert(record.chunk_id.clone(), idx).is_some() {
                return Err(StoreError::DuplicateChunkId {
                    chunk_id: record.chunk_id,
                });
            }
            shards
                .entry(record.metadata.department.to_lowercase())
                .or_default()
                .push(idx);
            chunks.push(StoredChunk { record, vector });
        }

        Ok(Self {
            dimension,
            chunks,
            by_id,
            shards,
        })
    }

    /// The dimension every stored vector satisfies.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Departments that have at least one chunk.
    #[must_use]
    pub fn departments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shards.keys().cloned().collect();
        names.sort();
        names
    }

    /// Top-k cosine search within one department shard.
    ///
    /// A missing shard yields an empty result, not an error; the only error
    /// is a query vector of the wrong dimension, which indicates an embedder
    /// misconfiguration upstream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryDimensionMismatch`] for malformed queries.
    pub fn search(
        &self,
        query: &[f32],
        department: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::QueryDimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let Some(indices) = self.shards.get(&department.to_lowercase()) else {
            return Ok(Vec::new());
        };

        // Vectors are unit-normalized at ingestion, so the inner product is
        // the cosine similarity.
        let mut scored: Vec<(usize, f32)> = indices
            .iter()
            .map(|&idx| {
                let stored = &self.chunks[idx];
                let dot: f32 = stored
                    .vector
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (idx, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, similarity)| {
                let record = &self.chunks[idx].record;
                SearchHit {
                    chunk_id: record.chunk_id.clone(),
                    content: record.content.clone(),
                    metadata: record.metadata.clone(),
                    similarity,
                }
            })
            .collect())
    }

    /// The embedding lookup: `chunk_id → (vector, content, metadata)`.
    #[must_use]
    pub fn lookup(&self, chunk_id: &str) -> Option<ChunkEntry<'_>> {
        self.by_id.get(chunk_id).map(|&idx| {
            let stored = &self.chunks[idx];
            ChunkEntry {
                vector: &stored.vector,
                record: &stored.record,
            }
        })
    }

    /// Aggregate counts for health endpoints and startup logs.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let mut per_department = BTreeMap::new();
        for (department, indices) in &self.shards {
            per_department.insert(department.clone(), indices.len());
        }
        StoreStats {
            total_chunks: self.chunks.len(),
            per_department,
        }
    }
}

/// Role sets arrive either as JSON lists or comma-separated strings depending
/// on the producing tool; both are normalized to trimmed lowercase entries.
fn deserialize_role_set<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        List(Vec<String>),
        Csv(String),
    }

    let parsed = Option::<Repr>::deserialize(deserializer)?;
    let raw = match parsed {
        None => Vec::new(),
        Some(Repr::List(values)) => values,
        Some(Repr::Csv(joined)) => joined.split(',').map(str::to_string).collect(),
    };

    let mut seen = std::collections::BTreeSet::new();
    Ok(raw
        .into_iter()
        .map(|role| role.trim().to_lowercase())
        .filter(|role| !role.is_empty() && seen.insert(role.clone()))
        .collect())
}
