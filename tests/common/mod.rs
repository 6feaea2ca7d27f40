//! Shared fixtures: a small multi-department corpus, the RBAC policy used by
//! the end-to-end scenarios, and fully wired service/app state builders.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use corpusgate::audit::AuditHandle;
use corpusgate::auth::{AuthService, NewUser, TokenSigner, UserBackend, UserStore};
use corpusgate::config::ServiceConfig;
use corpusgate::embed::HashedProjectionEmbedder;
use corpusgate::http::AppState;
use corpusgate::ingest::{
    DocumentPreparer, PreparerOptions, RoleDepartmentMap, SourceDocument,
};
use corpusgate::normalize::QueryNormalizer;
use corpusgate::pipeline::RetrievalService;
use corpusgate::rbac::{RbacConfig, RoleDefinition};
use corpusgate::store::VectorStore;

pub const TEST_DIMENSION: usize = 64;
pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key-0123456789";

/// Service configuration tuned for the fixtures: small embedding dimension,
/// production-default similarity floor.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        embedding_dimension: TEST_DIMENSION,
        similarity_threshold: 0.30,
        signing_key: TEST_SIGNING_KEY.to_string(),
        ..ServiceConfig::default()
    }
}

/// The scenario policy: flat roles, no inheritance, one `read:` permission
/// each, plus the admin wildcard.
pub fn scenario_rbac_config() -> RbacConfig {
    fn def(permissions: &[&str]) -> RoleDefinition {
        RoleDefinition {
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            inherits: Vec::new(),
        }
    }

    let mut roles = BTreeMap::new();
    roles.insert("admin".to_string(), def(&["*"]));
    roles.insert("finance_analyst".to_string(), def(&["read:finance"]));
    roles.insert("marketing_manager".to_string(), def(&["read:marketing"]));
    roles.insert("hr_manager".to_string(), def(&["read:hr"]));
    roles.insert("intern".to_string(), def(&["read:general"]));

    RbacConfig {
        roles,
        role_aliases: [("Finance".to_string(), "finance_analyst".to_string())]
            .into_iter()
            .collect(),
        departments: ["finance", "marketing", "hr", "engineering", "general"]
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

/// One small document per chunk so similarity expectations stay sharp: the
/// first finance document *is* the scenario-1 query after normalization.
pub fn corpus() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new(
            "quarterly_financial_report.md",
            "finance",
            "quarter 4 revenue growth",
        ),
        SourceDocument::new(
            "revenue_breakdown.md",
            "finance",
            "revenue grew strongly in quarter 4 compared to quarter 3",
        ),
        SourceDocument::new(
            "finance_initiatives.md",
            "finance",
            "strategic initiatives roadmap",
        ),
        SourceDocument::new(
            "marketing_report_q4.md",
            "marketing",
            "market share held steady in quarter 4",
        ),
        SourceDocument::new(
            "marketing_initiatives.md",
            "marketing",
            "strategic initiatives overview",
        ),
        SourceDocument::new("hr_data.csv", "hr", "employee,salary\nada,100\ngrace,120\n"),
        SourceDocument::new(
            "employee_handbook.md",
            "general",
            "what is the finance policy and how does it apply to employees",
        ),
    ]
}

/// Build the department-sharded store from the fixture corpus.
pub fn build_store() -> Arc<VectorStore> {
    let embedder = HashedProjectionEmbedder::new(TEST_DIMENSION);
    let preparer = DocumentPreparer::new(PreparerOptions::default(), RoleDepartmentMap::builtin());
    let artifacts = preparer
        .prepare(&corpus(), &embedder)
        .expect("fixture corpus must prepare");
    Arc::new(artifacts.into_store().expect("fixture store must build"))
}

/// A retrieval service over the fixture corpus and scenario policy.
pub fn retrieval_service(audit: AuditHandle) -> RetrievalService {
    let config = test_config();
    RetrievalService::new(
        &config,
        Arc::new(QueryNormalizer::with_defaults()),
        Arc::new(HashedProjectionEmbedder::new(TEST_DIMENSION)),
        build_store(),
        Arc::new(scenario_rbac_config()),
        audit,
    )
}

/// Fully wired app state with seeded users, backed by an in-memory user
/// store and a disconnected audit bus.
pub async fn app_state() -> AppState {
    let config = Arc::new(test_config());

    let users = UserStore::open_in_memory().await.expect("user store");
    for (username, password, roles, is_active) in [
        ("alice", "alice-password", vec!["finance_analyst"], true),
        ("intern1", "intern-password", vec!["intern"], true),
        ("root", "root-password", vec!["admin"], true),
        ("mallory", "mallory-password", vec!["intern"], false),
    ] {
        users
            .upsert(NewUser {
                username: username.to_string(),
                password: password.to_string(),
                roles: roles.into_iter().map(str::to_string).collect(),
                is_active,
            })
            .await
            .expect("seed user");
    }

    let signer = TokenSigner::new(
        config.signing_key.as_bytes(),
        config.signing_algorithm,
        config.access_token_ttl_seconds,
        config.refresh_token_ttl_seconds,
    );
    let auth = Arc::new(AuthService::new(
        Arc::new(users),
        signer,
        AuditHandle::disconnected(),
    ));
    let retrieval = Arc::new(retrieval_service(AuditHandle::disconnected()));

    AppState {
        config,
        auth,
        retrieval,
    }
}
