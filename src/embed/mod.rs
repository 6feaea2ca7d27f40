//! Text embedding behind a narrow trait.
//!
//! Query and chunk text must go through the *same* embedding scheme or cosine
//! comparisons are meaningless, so the whole service shares one
//! [`Embedder`] handle. Implementations must be deterministic and thread-safe;
//! the retrieval path calls [`Embedder::embed`] from many request tasks at
//! once.
//!
//! The shipping implementation is [`HashedProjectionEmbedder`]: a hashed
//! bag-of-words plus character-trigram projection onto a fixed-dimension unit
//! sphere. It captures lexical overlap, not semantics, but it is fully
//! deterministic, dependency-free, and fast enough to embed every query
//! variant inline. A model-backed embedder slots in by implementing the trait
//! with the same dimension.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Embedding dimension used across the service unless configured otherwise.
pub const DEFAULT_DIMENSION: usize = 384;

/// An error produced while embedding text.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The embedding backend could not produce a vector.
    #[error("embedding backend unavailable: {reason}")]
    Unavailable {
        /// Human-readable reason.
        reason: String,
    },
}

/// Maps text to a fixed-dimension unit vector.
///
/// # Contract
///
/// - Deterministic: the same input always yields the same vector.
/// - `embed(s).len() == dimension()` for every input.
/// - The output is L2-normalized to within `1e-5` (empty input is the one
///   exception and yields the zero vector).
pub trait Embedder: Send + Sync {
    /// The dimension of every produced vector.
    fn dimension(&self) -> usize;

    /// Embed a single text fragment.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when the backend cannot produce a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed a batch of fragments. The default calls [`Embedder::embed`]
    /// sequentially; backends with real batch APIs should override.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when any fragment fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs rather than
/// erroring; for unit vectors this reduces to the inner product.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Deterministic lexical embedder.
///
/// Two signals are mixed into the projection:
///
/// - each word hashes to a dimension index with a hash-derived sign and
///   weight (primary, vocabulary-level signal);
/// - each character trigram hashes to an index with half weight (secondary
///   signal, gives partial credit to near-miss spellings).
///
/// The accumulated vector is L2-normalized, so inner product equals cosine
/// similarity downstream.
#[derive(Debug, Clone, Copy)]
pub struct HashedProjectionEmbedder {
    dimension: usize,
}

impl HashedProjectionEmbedder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(text: &str) -> u64 {
        // DefaultHasher with fixed keys is stable across runs and platforms,
        // which keeps chunk vectors comparable to later query vectors.
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    fn project(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let folded: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in folded.split_whitespace() {
            let hash = Self::bucket(word);
            let idx = (hash as usize) % self.dimension;
            let sign = if hash & (1 << 33) == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + ((hash >> 8) & 0x7F) as f32 / 127.0;
            vector[idx] += sign * weight;
        }

        let chars: Vec<char> = folded.chars().collect();
        for window in chars.windows(3) {
            if window.iter().any(|c| c.is_whitespace()) {
                continue;
            }
            let trigram: String = window.iter().collect();
            let hash = Self::bucket(&trigram);
            let idx = (hash as usize) % self.dimension;
            let sign = if hash & (1 << 33) == 0 { 0.5 } else { -0.5 };
            vector[idx] += sign;
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for HashedProjectionEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashedProjectionEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.project(text))
    }
}
