//! On-disk index artifacts.
//!
//! A rebuild writes a fresh *generation* directory containing:
//!
//! - `chunks.json`: JSON array of chunk records (text + metadata);
//! - `embeddings.f32`: row-major little-endian float32 matrix, rows aligned
//!   with the chunks file.
//!
//! The generation becomes live by atomically swapping the `current` pointer
//! file at the artifacts root. The service only ever reads through the
//! pointer, so a crashed rebuild leaves the previous generation untouched.

use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::store::{ChunkRecord, VectorStore};

use super::IngestError;

/// File name of the chunk records inside a generation directory.
pub const CHUNKS_FILE: &str = "chunks.json";
/// File name of the embeddings matrix inside a generation directory.
pub const EMBEDDINGS_FILE: &str = "embeddings.f32";
/// Pointer file at the artifacts root naming the live generation.
pub const POINTER_FILE: &str = "current";

const RECORD_KEYS: &[&str] = &["chunk_id", "content", "token_count", "metadata"];
const METADATA_KEYS: &[&str] = &[
    "chunk_id",
    "source_document",
    "department",
    "chunk_index",
    "allowed_roles",
    "explicit_deny",
    "security_level",
    "created_at",
];

/// A fully prepared index: chunk records plus their aligned vectors.
#[derive(Clone, Debug)]
pub struct IndexArtifacts {
    pub records: Vec<ChunkRecord>,
    pub vectors: Vec<Vec<f32>>,
    pub dimension: usize,
}

impl IndexArtifacts {
    /// Write this index as a new generation under `root` and swap the
    /// `current` pointer to it.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on any I/O or serialization failure. The
    /// pointer is only swapped after both files are fully written.
    pub fn write_generation(&self, root: &Path, label: &str) -> Result<PathBuf, IngestError> {
        let generation_dir = root.join(label);
        std::fs::create_dir_all(&generation_dir).map_err(|source| IngestError::Io {
            path: generation_dir.clone(),
            source,
        })?;

        let chunks_path = generation_dir.join(CHUNKS_FILE);
        let encoded =
            serde_json::to_vec_pretty(&self.records).map_err(|source| IngestError::ArtifactParse {
                source,
            })?;
        std::fs::write(&chunks_path, encoded).map_err(|source| IngestError::Io {
            path: chunks_path,
            source,
        })?;

        let embeddings_path = generation_dir.join(EMBEDDINGS_FILE);
        let mut buffer = Vec::with_capacity(self.vectors.len() * self.dimension * 4);
        for vector in &self.vectors {
            for value in vector {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
        std::fs::write(&embeddings_path, buffer).map_err(|source| IngestError::Io {
            path: embeddings_path,
            source,
        })?;

        // Atomic pointer swap: write-then-rename on the same filesystem.
        let pointer_tmp = root.join(format!("{POINTER_FILE}.tmp"));
        std::fs::write(&pointer_tmp, label).map_err(|source| IngestError::Io {
            path: pointer_tmp.clone(),
            source,
        })?;
        let pointer = root.join(POINTER_FILE);
        std::fs::rename(&pointer_tmp, &pointer).map_err(|source| IngestError::Io {
            path: pointer,
            source,
        })?;

        Ok(generation_dir)
    }

    /// Load the generation named by the `current` pointer.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when the pointer or the generation it names
    /// cannot be read.
    pub fn load_current(root: &Path, dimension: usize) -> Result<Self, IngestError> {
        let pointer = root.join(POINTER_FILE);
        let label = std::fs::read_to_string(&pointer).map_err(|source| IngestError::Io {
            path: pointer,
            source,
        })?;
        Self::load_generation(&root.join(label.trim()), dimension)
    }

    /// Load a specific generation directory.
    ///
    /// Unknown fields in the chunks file are dropped with a warning; the
    /// record shape itself must parse.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] on unreadable files, malformed JSON, or a
    /// binary matrix that does not align with the chunk records.
    pub fn load_generation(dir: &Path, dimension: usize) -> Result<Self, IngestError> {
        let chunks_path = dir.join(CHUNKS_FILE);
        let raw = std::fs::read_to_string(&chunks_path).map_err(|source| IngestError::Io {
            path: chunks_path,
            source,
        })?;
        let values: Vec<Value> =
            serde_json::from_str(&raw).map_err(|source| IngestError::ArtifactParse { source })?;
        warn_unknown_fields(&values);
        let records: Vec<ChunkRecord> = serde_json::from_value(Value::Array(values))
            .map_err(|source| IngestError::ArtifactParse { source })?;

        let embeddings_path = dir.join(EMBEDDINGS_FILE);
        let bytes = std::fs::read(&embeddings_path).map_err(|source| IngestError::Io {
            path: embeddings_path,
            source,
        })?;

        let row_bytes = dimension * 4;
        if row_bytes == 0 || bytes.len() % row_bytes != 0 {
            return Err(IngestError::ArtifactLayout {
                message: format!(
                    "embeddings file holds {} bytes, not a multiple of {row_bytes} (dimension {dimension})",
                    bytes.len()
                ),
            });
        }
        let rows = bytes.len() / row_bytes;
        if rows != records.len() {
            return Err(IngestError::ArtifactLayout {
                message: format!(
                    "embeddings file holds {rows} rows but chunks file holds {} records",
                    records.len()
                ),
            });
        }

        let mut vectors = Vec::with_capacity(rows);
        for row in bytes.chunks_exact(row_bytes) {
            let vector: Vec<f32> = row
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            vectors.push(vector);
        }

        Ok(Self {
            records,
            vectors,
            dimension,
        })
    }

    /// Assemble the in-memory store from these artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when the artifacts violate store invariants
    /// (misaligned rows, duplicate ids, wrong dimensions).
    pub fn into_store(self) -> Result<VectorStore, IngestError> {
        VectorStore::from_records(self.records, self.vectors, self.dimension)
            .map_err(IngestError::from)
    }
}

/// The chunks file is produced by external tooling; fields we don't model
/// are dropped, once-warned per field name.
fn warn_unknown_fields(values: &[Value]) {
    let record_keys: BTreeSet<&str> = RECORD_KEYS.iter().copied().collect();
    let metadata_keys: BTreeSet<&str> = METADATA_KEYS.iter().copied().collect();
    let mut warned: BTreeSet<String> = BTreeSet::new();

    for value in values {
        let Some(object) = value.as_object() else {
            continue;
        };
        for key in object.keys() {
            if !record_keys.contains(key.as_str()) && warned.insert(key.clone()) {
                warn!(field = %key, "unknown chunk record field dropped on ingest");
            }
        }
        if let Some(metadata) = object.get("metadata").and_then(Value::as_object) {
            for key in metadata.keys() {
                if !metadata_keys.contains(key.as_str()) && warned.insert(format!("metadata.{key}"))
                {
                    warn!(field = %key, "unknown chunk metadata field dropped on ingest");
                }
            }
        }
    }
}
