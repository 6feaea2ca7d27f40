//! The retrieval pipeline.
//!
//! One request flows through a fixed step order:
//!
//! 1. validate the raw query and `top_k`;
//! 2. normalize and generate variants;
//! 3. resolve the caller's accessible departments;
//! 4. search every (variant × accessible shard) pair, `2·top_k` each;
//! 5. enforce RBAC per chunk before anything is ranked; department sharding
//!    already scopes the search, but `allowed_roles` / `explicit_deny` can
//!    narrow further than the shard does;
//! 6. re-rank against the normalized-query embedding and truncate;
//! 7. derive a confidence band from the mean similarity and audit the run.
//!
//! Deadlines are cooperative: the pipeline checks between shard searches and
//! before the re-rank, and an expired deadline fails the request rather than
//! returning partial results.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use serde::Serialize;

use crate::audit::{AuditEvent, AuditHandle};
use crate::auth::CallerIdentity;
use crate::config::ServiceConfig;
use crate::embed::{EmbedError, Embedder};
use crate::normalize::QueryNormalizer;
use crate::rbac::{RbacConfig, RbacEngine};
use crate::rerank::ReRanker;
use crate::store::{SearchHit, VectorStore};

/// Maximum accepted query length in characters.
const MAX_QUERY_CHARS: usize = 1000;
/// Maximum accepted `top_k`.
const MAX_TOP_K: usize = 20;

/// Errors raised while executing a query.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request itself is malformed. Never retried.
    #[error("invalid request: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// The embedder could not vectorize the query; fatal for this request.
    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// The cooperative deadline expired; partial results are not returned.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Every shard search failed; nothing meaningful can be returned.
    #[error("all shard searches failed")]
    ShardsUnavailable,
}

/// Coarse quality label derived from the mean similarity of returned chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceBand {
    /// Band thresholds: ≥ 0.70 high, ≥ 0.50 medium, ≥ 0.30 low.
    #[must_use]
    pub fn from_average(average: f32) -> Self {
        if average >= 0.70 {
            Self::High
        } else if average >= 0.50 {
            Self::Medium
        } else if average >= 0.30 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

/// The answer handed to the HTTP layer (and ultimately to the answer
/// generator): ranked chunks with citations, plus enough context to explain
/// an empty result.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub normalized_query: String,
    pub results: Vec<SearchHit>,
    pub confidence: ConfidenceBand,
    pub accessible_departments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Orchestrates normalizer, embedder, store, RBAC, and re-ranker for query
/// execution. Shared across request tasks behind an `Arc`; per-request state
/// lives in the RBAC engine constructed for each call.
pub struct RetrievalService {
    normalizer: Arc<QueryNormalizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    rbac_config: Arc<RbacConfig>,
    reranker: ReRanker,
    audit: AuditHandle,
    top_k_default: usize,
}

impl RetrievalService {
    #[must_use]
    pub fn new(
        config: &ServiceConfig,
        normalizer: Arc<QueryNormalizer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<VectorStore>,
        rbac_config: Arc<RbacConfig>,
        audit: AuditHandle,
    ) -> Self {
        Self {
            normalizer,
            embedder,
            store,
            rbac_config,
            reranker: ReRanker::new(config.similarity_threshold),
            audit,
            top_k_default: config.top_k_default,
        }
    }

    /// The store backing this service; exposed for health reporting.
    #[must_use]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// The process-wide RBAC configuration.
    #[must_use]
    pub fn rbac_config(&self) -> &Arc<RbacConfig> {
        &self.rbac_config
    }

    /// Build the per-request RBAC engine for a caller.
    #[must_use]
    pub fn rbac_engine(&self, identity: &CallerIdentity) -> RbacEngine {
        RbacEngine::new(Arc::clone(&self.rbac_config), &identity.roles)
    }

    /// Execute a query in the authenticated caller's context.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for malformed requests, embedder failure,
    /// deadline expiry, or total shard failure. A caller with zero
    /// accessible departments is *not* an error; it yields an empty result
    /// with a reason.
    pub async fn query(
        &self,
        identity: &CallerIdentity,
        raw_query: &str,
        top_k: Option<usize>,
        deadline: Instant,
    ) -> Result<QueryResponse, PipelineError> {
        let top_k = top_k.unwrap_or(self.top_k_default);
        validate_request(raw_query, top_k)?;

        let normalized = self.normalizer.normalize(raw_query);
        if normalized.is_empty() {
            return Err(PipelineError::Validation {
                message: "query contains no searchable text".to_string(),
            });
        }
        let variants = self.normalizer.generate_variants(&normalized);
        debug!(variants = variants.len(), %normalized, "query normalized");

        let engine = self.rbac_engine(identity);
        let accessible: Vec<String> = engine.accessible_departments().iter().cloned().collect();
        if accessible.is_empty() {
            self.audit.emit(AuditEvent::query_completed(
                &identity.username,
                variants.len(),
                0,
                0,
            ));
            return Ok(QueryResponse {
                query: raw_query.to_string(),
                normalized_query: normalized,
                results: Vec::new(),
                confidence: ConfidenceBand::VeryLow,
                accessible_departments: accessible,
                reason: Some("no accessible departments".to_string()),
            });
        }

        // Variant × shard search, 2·top_k candidates each. Single-shard
        // failures are logged and skipped; only a full wipe-out aborts.
        let mut pool: Vec<SearchHit> = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;
        for variant in &variants {
            let variant_vector = self.embedder.embed(variant)?;
            for department in &accessible {
                check_deadline(deadline)?;
                attempted += 1;
                match self.store.search(&variant_vector, department, 2 * top_k) {
                    Ok(hits) => pool.extend(hits),
                    Err(err) => {
                        failed += 1;
                        warn!(%department, %err, "shard search failed, skipping");
                    }
                }
            }
        }
        if attempted > 0 && failed == attempted {
            return Err(PipelineError::ShardsUnavailable);
        }
        let pool_size = pool.len();

        // Chunk-level RBAC before anything is ranked or returned.
        let mut denied_audited = std::collections::BTreeSet::new();
        let allowed: Vec<SearchHit> = pool
            .into_iter()
            .filter(|candidate| {
                if engine.is_allowed(&candidate.metadata) {
                    true
                } else {
                    if denied_audited.insert(candidate.chunk_id.clone()) {
                        self.audit.emit(AuditEvent::access_decision(
                            &identity.username,
                            &candidate.chunk_id,
                            &candidate.metadata.department,
                            false,
                        ));
                    }
                    false
                }
            })
            .collect();
        debug!(
            pool = pool_size,
            allowed = allowed.len(),
            denied = denied_audited.len(),
            "rbac filter applied"
        );

        check_deadline(deadline)?;

        let query_vector = self.embedder.embed(&normalized)?;
        let mut ranked = self.reranker.rerank(&query_vector, allowed, &self.store);
        ranked.truncate(top_k);

        let average = if ranked.is_empty() {
            0.0
        } else {
            ranked.iter().map(|hit| hit.similarity).sum::<f32>() / ranked.len() as f32
        };

        self.audit.emit(AuditEvent::query_completed(
            &identity.username,
            variants.len(),
            pool_size,
            ranked.len(),
        ));

        Ok(QueryResponse {
            query: raw_query.to_string(),
            normalized_query: normalized,
            results: ranked,
            confidence: ConfidenceBand::from_average(average),
            accessible_departments: accessible,
            reason: None,
        })
    }
}

fn validate_request(raw_query: &str, top_k: usize) -> Result<(), PipelineError> {
    let chars = raw_query.chars().count();
    if raw_query.trim().is_empty() {
        return Err(PipelineError::Validation {
            message: "query must not be empty".to_string(),
        });
    }
    if chars > MAX_QUERY_CHARS {
        return Err(PipelineError::Validation {
            message: format!("query exceeds {MAX_QUERY_CHARS} characters"),
        });
    }
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(PipelineError::Validation {
            message: format!("top_k must be between 1 and {MAX_TOP_K}"),
        });
    }
    Ok(())
}

fn check_deadline(deadline: Instant) -> Result<(), PipelineError> {
    if Instant::now() >= deadline {
        return Err(PipelineError::DeadlineExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashedProjectionEmbedder;
    use crate::ingest::{DocumentPreparer, PreparerOptions, RoleDepartmentMap, SourceDocument};
    use std::time::Duration;

    fn corpus() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new(
                "quarterly_financial_report.md",
                "finance",
                "quarter 4 revenue grew twelve percent year over year\n\n\
                 operating costs held flat across the finance organization",
            ),
            SourceDocument::new(
                "marketing_report.md",
                "marketing",
                "the marketing campaign lifted customer conversion in quarter 4",
            ),
            SourceDocument::new(
                "employee_handbook.md",
                "general",
                "the company policy allows remote work three days per week",
            ),
        ]
    }

    fn service() -> RetrievalService {
        let embedder = Arc::new(HashedProjectionEmbedder::new(64));
        let preparer =
            DocumentPreparer::new(PreparerOptions::default(), RoleDepartmentMap::builtin());
        let artifacts = preparer.prepare(&corpus(), embedder.as_ref()).unwrap();
        let store = Arc::new(artifacts.into_store().unwrap());

        let config = ServiceConfig {
            similarity_threshold: 0.05,
            embedding_dimension: 64,
            ..ServiceConfig::default()
        };

        RetrievalService::new(
            &config,
            Arc::new(QueryNormalizer::with_defaults()),
            embedder,
            store,
            Arc::new(RbacConfig::builtin()),
            AuditHandle::disconnected(),
        )
    }

    fn identity(username: &str, roles: &[&str]) -> CallerIdentity {
        CallerIdentity {
            username: username.to_string(),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn finance_caller_gets_finance_results() {
        let service = service();
        let response = service
            .query(
                &identity("alice", &["finance_analyst"]),
                "Q4 revenue growth",
                Some(3),
                far_deadline(),
            )
            .await
            .unwrap();

        assert!(response.normalized_query.contains("quarter 4"));
        assert!(!response.results.is_empty());
        assert!(response.results.len() <= 3);
        for hit in &response.results {
            assert!(matches!(
                hit.metadata.department.as_str(),
                "finance" | "general"
            ));
        }
    }

    #[tokio::test]
    async fn marketing_chunks_never_leak_to_finance_callers() {
        let service = service();
        let response = service
            .query(
                &identity("alice", &["finance_analyst"]),
                "marketing campaign conversion in Q4",
                Some(5),
                far_deadline(),
            )
            .await
            .unwrap();
        assert!(
            response
                .results
                .iter()
                .all(|hit| hit.metadata.department != "marketing")
        );
    }

    #[tokio::test]
    async fn every_returned_chunk_passes_is_allowed() {
        let service = service();
        let caller = identity("intern1", &["intern"]);
        let response = service
            .query(&caller, "what is the finance policy", Some(5), far_deadline())
            .await
            .unwrap();

        let engine = service.rbac_engine(&caller);
        for hit in &response.results {
            assert!(engine.is_allowed(&hit.metadata));
            assert_eq!(hit.metadata.department, "general");
        }
    }

    #[tokio::test]
    async fn admin_can_see_multiple_departments() {
        let service = service();
        let response = service
            .query(
                &identity("root", &["admin"]),
                "quarter 4 revenue and marketing campaign results",
                Some(10),
                far_deadline(),
            )
            .await
            .unwrap();
        assert_eq!(response.accessible_departments.len(), 5);
        let departments: std::collections::BTreeSet<_> = response
            .results
            .iter()
            .map(|hit| hit.metadata.department.clone())
            .collect();
        assert!(departments.len() >= 2);
    }

    #[tokio::test]
    async fn no_accessible_departments_is_a_reasoned_empty_result() {
        let service = service();
        let response = service
            .query(
                &identity("ghost", &["unknown_role"]),
                "anything at all",
                None,
                far_deadline(),
            )
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.reason.as_deref(), Some("no accessible departments"));
        assert_eq!(response.confidence, ConfidenceBand::VeryLow);
    }

    #[tokio::test]
    async fn validation_rejects_bad_inputs() {
        let service = service();
        let caller = identity("alice", &["finance_analyst"]);

        let empty = service.query(&caller, "   ", None, far_deadline()).await;
        assert!(matches!(empty, Err(PipelineError::Validation { .. })));

        let long = "x".repeat(1001);
        let too_long = service.query(&caller, &long, None, far_deadline()).await;
        assert!(matches!(too_long, Err(PipelineError::Validation { .. })));

        let bad_k = service
            .query(&caller, "revenue", Some(21), far_deadline())
            .await;
        assert!(matches!(bad_k, Err(PipelineError::Validation { .. })));
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_partial_results() {
        let service = service();
        let err = service
            .query(
                &identity("alice", &["finance_analyst"]),
                "Q4 revenue",
                Some(3),
                Instant::now() - Duration::from_millis(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn results_are_sorted_unique_and_floored() {
        let service = service();
        let response = service
            .query(
                &identity("root", &["admin"]),
                "quarter 4 revenue growth campaign policy",
                Some(10),
                far_deadline(),
            )
            .await
            .unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for pair in response.results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        for hit in &response.results {
            assert!(hit.similarity >= 0.05);
            assert!(seen.insert(hit.chunk_id.clone()));
        }
    }

    #[test]
    fn confidence_bands_partition_the_range() {
        assert_eq!(ConfidenceBand::from_average(0.85), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_average(0.70), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_average(0.55), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_average(0.35), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_average(0.1), ConfidenceBand::VeryLow);
    }
}
