//! Offline document preparation.
//!
//! The preparer turns raw source documents into index artifacts:
//!
//! 1. [`parser`] flattens each file to cleaned paragraph text;
//! 2. [`chunker`] cuts token-bounded, overlapping chunks;
//! 3. [`tagger`] stamps each chunk with department and role metadata;
//! 4. the shared embedder produces one unit vector per chunk;
//! 5. [`artifacts`] persists everything as an atomically-swapped generation.
//!
//! The service itself never writes the index; it loads the artifacts
//! read-only at startup and on reload.

pub mod artifacts;
pub mod chunker;
pub mod parser;
pub mod tagger;

use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::{ChunkIdScheme, ServiceConfig};
use crate::embed::{EmbedError, Embedder};
use crate::store::{ChunkRecord, StoreError};

pub use artifacts::IndexArtifacts;
pub use chunker::{ChunkStrategy, Chunker, count_tokens};
pub use parser::{SourceDocument, SourceFormat, flatten};
pub use tagger::{RoleDepartmentMap, tag_chunk};

/// Errors raised during ingestion or artifact handling.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Filesystem failure while reading or writing artifacts.
    #[error("artifact I/O failed at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The chunks file is not valid JSON for the expected shape.
    #[error("failed to parse chunk records: {source}")]
    ArtifactParse {
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The binary embeddings matrix does not line up with the chunks file.
    #[error("index artifacts are inconsistent: {message}")]
    ArtifactLayout {
        /// Description of the inconsistency.
        message: String,
    },

    /// The embedder failed while vectorizing a chunk.
    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// The produced artifacts violate store invariants.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunables for a preparation run.
#[derive(Clone, Copy, Debug)]
pub struct PreparerOptions {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub strategy: ChunkStrategy,
    pub id_scheme: ChunkIdScheme,
}

impl Default for PreparerOptions {
    fn default() -> Self {
        Self {
            target_tokens: 512,
            overlap_tokens: 50,
            strategy: ChunkStrategy::ParagraphFirst,
            id_scheme: ChunkIdScheme::Ordinal,
        }
    }
}

impl PreparerOptions {
    /// Derive options from the service configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            target_tokens: config.chunk_target_tokens,
            overlap_tokens: config.chunk_overlap_tokens,
            strategy: ChunkStrategy::ParagraphFirst,
            id_scheme: config.chunk_id_scheme,
        }
    }
}

/// Runs the parse → chunk → tag → embed pipeline over a document set.
pub struct DocumentPreparer {
    chunker: Chunker,
    strategy: ChunkStrategy,
    id_scheme: ChunkIdScheme,
    role_map: RoleDepartmentMap,
}

impl DocumentPreparer {
    #[must_use]
    pub fn new(options: PreparerOptions, role_map: RoleDepartmentMap) -> Self {
        Self {
            chunker: Chunker::new(options.target_tokens, options.overlap_tokens),
            strategy: options.strategy,
            id_scheme: options.id_scheme,
            role_map,
        }
    }

    /// Prepare index artifacts from the given documents.
    ///
    /// Chunk ordinals are global and monotonic within one run, so ordinal
    /// ids are unique across departments.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if embedding any chunk fails.
    pub fn prepare(
        &self,
        documents: &[SourceDocument],
        embedder: &dyn Embedder,
    ) -> Result<IndexArtifacts, IngestError> {
        let mut records = Vec::new();
        let mut vectors = Vec::new();
        let mut ordinal = 0usize;

        for document in documents {
            let flattened = flatten(document);
            let chunks = self.chunker.chunk(&flattened, self.strategy);
            info!(
                source = %document.filename,
                department = %document.department,
                chunks = chunks.len(),
                "document chunked"
            );

            for (chunk_index, content) in chunks.into_iter().enumerate() {
                ordinal += 1;
                let chunk_id = self.chunk_id(&document.department, ordinal, &content);
                let metadata = tag_chunk(
                    &self.role_map,
                    &chunk_id,
                    &document.filename,
                    &document.department,
                    chunk_index,
                );
                let vector = embedder.embed(&content)?;
                records.push(ChunkRecord {
                    chunk_id,
                    token_count: count_tokens(&content),
                    content,
                    metadata,
                });
                vectors.push(vector);
            }
        }

        Ok(IndexArtifacts {
            records,
            vectors,
            dimension: embedder.dimension(),
        })
    }

    fn chunk_id(&self, department: &str, ordinal: usize, content: &str) -> String {
        let department = department.to_uppercase();
        match self.id_scheme {
            ChunkIdScheme::Ordinal => format!("{department}_CHUNK_{ordinal}"),
            ChunkIdScheme::ContentHash => {
                format!("{department}_CHUNK_{:016x}", fnv1a64(content.as_bytes()))
            }
        }
    }
}

/// FNV-1a, 64-bit. Stable across rebuilds for unchanged chunk text.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
