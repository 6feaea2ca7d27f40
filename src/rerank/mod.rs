//! Candidate re-ranking.
//!
//! Shard searches run per query variant and per department, so the merged
//! candidate pool mixes scores that are not comparable and chunks that appear
//! more than once. The re-ranker restores a single ordering by recomputing
//! every similarity against the *normalized* query vector through the store's
//! embedding lookup, then flooring, deduplicating, and sorting.
//!
//! Output invariants: similarities are non-increasing, every similarity is at
//! least the configured floor, and chunk ids are distinct.

use tracing::warn;

use crate::embed::cosine_similarity;
use crate::store::{SearchHit, VectorStore};

/// Geometric re-ranker with a similarity floor and an optional per-source
/// diversity cap.
#[derive(Clone, Debug)]
pub struct ReRanker {
    threshold: f32,
    max_per_source: Option<usize>,
}

impl ReRanker {
    /// Create a re-ranker that drops candidates scoring below `threshold`.
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            max_per_source: None,
        }
    }

    /// Cap results at `max` chunks per source document. Off by default.
    #[must_use]
    pub fn with_diversity_cap(mut self, max: usize) -> Self {
        self.max_per_source = Some(max);
        self
    }

    /// The configured similarity floor.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Re-score, floor, deduplicate, and sort a candidate pool.
    ///
    /// Candidates whose chunk id is missing from the embedding lookup are
    /// dropped with a warning; a miss means the pool and the index disagree,
    /// which should only happen across a rebuild race.
    #[must_use]
    pub fn rerank(
        &self,
        query_vector: &[f32],
        candidates: Vec<SearchHit>,
        store: &VectorStore,
    ) -> Vec<SearchHit> {
        let initial = candidates.len();

        // Re-score every candidate against the canonical query vector.
        let mut scored: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|mut candidate| {
                let Some(entry) = store.lookup(&candidate.chunk_id) else {
                    warn!(chunk_id = %candidate.chunk_id, "candidate missing from embedding lookup, dropping");
                    return None;
                };
                candidate.similarity = cosine_similarity(query_vector, entry.vector);
                Some(candidate)
            })
            .collect();

        // Similarity floor.
        scored.retain(|candidate| candidate.similarity >= self.threshold);
        let floored = initial - scored.len();
        if floored > 0 {
            tracing::debug!(dropped = floored, threshold = self.threshold, "similarity floor applied");
        }

        // First occurrence wins per chunk id.
        let mut seen = std::collections::BTreeSet::new();
        scored.retain(|candidate| seen.insert(candidate.chunk_id.clone()));

        // Stable descending sort keeps equal-score candidates in pool order.
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(cap) = self.max_per_source {
            let mut per_source: std::collections::BTreeMap<String, usize> =
                std::collections::BTreeMap::new();
            scored.retain(|candidate| {
                let count = per_source
                    .entry(candidate.metadata.source_document.clone())
                    .or_insert(0);
                *count += 1;
                *count <= cap
            });
        }

        scored
    }
}
