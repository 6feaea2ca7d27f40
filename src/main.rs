//! Corpusgate server binary.
//!
//! ```bash
//! corpusgate [config-file]               # serve
//! corpusgate ingest <corpus-dir> [config-file]   # rebuild index artifacts
//! ```
//!
//! The ingest subcommand expects one subdirectory per department
//! (`corpus/finance/report.md`, `corpus/general/handbook.md`, ...) and writes
//! a fresh artifact generation, atomically swapping the `current` pointer.
//!
//! While serving, SIGHUP triggers a graceful reload (drain, rebuild state
//! from the now-current artifacts, listen again); Ctrl-C shuts down.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use corpusgate::audit::{AuditBus, JsonLinesDirSink};
use corpusgate::auth::{AuthService, NewUser, TokenSigner, UserBackend, UserStore};
use corpusgate::config::{ConfigBuilder, ConfigError, ServiceConfig};
use corpusgate::embed::{Embedder, HashedProjectionEmbedder};
use corpusgate::http::{self, AppState};
use corpusgate::ingest::{
    DocumentPreparer, IndexArtifacts, PreparerOptions, RoleDepartmentMap, SourceDocument,
};
use corpusgate::normalize::QueryNormalizer;
use corpusgate::pipeline::RetrievalService;
use corpusgate::rbac::RbacConfig;

#[derive(Clone, Copy, Debug)]
enum Lifecycle {
    Reload,
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(command) if command == "ingest" => {
            let corpus_dir = args
                .next()
                .ok_or("usage: corpusgate ingest <corpus-dir> [config-file]")?;
            let config = load_config(args.next())?;
            run_ingest(&config, Path::new(&corpus_dir))
        }
        Some(config_path) => serve(load_config(Some(config_path))?).await,
        None => serve(load_config(None)?).await,
    }
}

fn load_config(path: Option<String>) -> Result<ServiceConfig, ConfigError> {
    let mut builder = ConfigBuilder::new();
    if let Some(path) = path {
        builder = builder.with_file(path)?;
    }
    builder.with_env().build()
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);

    loop {
        let (state, audit_bus) = build_state(Arc::clone(&config)).await?;
        let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
        info!(addr = %config.bind_addr, "corpusgate listening");

        let decision = Arc::new(tokio::sync::Mutex::new(Lifecycle::Shutdown));
        let shutdown = {
            let decision = Arc::clone(&decision);
            async move {
                *decision.lock().await = wait_for_signal().await;
            }
        };

        axum::serve(listener, http::router(state))
            .with_graceful_shutdown(shutdown)
            .await?;
        audit_bus.shutdown().await;

        match *decision.lock().await {
            Lifecycle::Reload => {
                info!("reload signal received, rebuilding service state");
            }
            Lifecycle::Shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn build_state(
    config: Arc<ServiceConfig>,
) -> Result<(AppState, AuditBus), Box<dyn std::error::Error>> {
    let audit_bus = AuditBus::spawn(vec![Box::new(JsonLinesDirSink::create(
        &config.audit_sink_path,
    )?)]);

    let rbac_config = Arc::new(match &config.rbac_config_path {
        Some(path) => RbacConfig::from_json_file(path)?,
        None => RbacConfig::builtin(),
    });

    let artifacts =
        IndexArtifacts::load_current(&config.index_artifacts_path, config.embedding_dimension)?;
    let store = Arc::new(artifacts.into_store()?);
    let stats = store.stats();
    info!(
        chunks = stats.total_chunks,
        departments = stats.per_department.len(),
        "index loaded"
    );

    let embedder: Arc<dyn Embedder> =
        Arc::new(HashedProjectionEmbedder::new(config.embedding_dimension));

    let users = UserStore::open(&config.users_db_path).await?;
    seed_users_if_requested(&users).await?;
    if users.count().await? == 0 {
        warn!("user store is empty; logins will fail until users are provisioned");
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
        audit_bus.handle(),
    ));

    let retrieval = Arc::new(RetrievalService::new(
        &config,
        Arc::new(QueryNormalizer::with_defaults()),
        embedder,
        store,
        rbac_config,
        audit_bus.handle(),
    ));

    Ok((
        AppState {
            config,
            auth,
            retrieval,
        },
        audit_bus,
    ))
}

/// Optional bootstrap: `CORPUSGATE_SEED_USERS` names a JSON array of users to
/// upsert at startup. Meant for first-run provisioning and local development.
async fn seed_users_if_requested(users: &UserStore) -> Result<(), Box<dyn std::error::Error>> {
    let Ok(path) = std::env::var("CORPUSGATE_SEED_USERS") else {
        return Ok(());
    };
    let raw = std::fs::read_to_string(&path)?;
    let seeds: Vec<NewUser> = serde_json::from_str(&raw)?;
    let count = seeds.len();
    for user in seeds {
        users.upsert(user).await?;
    }
    info!(%path, count, "seed users provisioned");
    Ok(())
}

fn run_ingest(config: &ServiceConfig, corpus_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut documents = Vec::new();
    for department_entry in std::fs::read_dir(corpus_dir)? {
        let department_entry = department_entry?;
        if !department_entry.file_type()?.is_dir() {
            continue;
        }
        let department = department_entry
            .file_name()
            .to_string_lossy()
            .to_lowercase();
        for file_entry in std::fs::read_dir(department_entry.path())? {
            let file_entry = file_entry?;
            if !file_entry.file_type()?.is_file() {
                continue;
            }
            let filename = file_entry.file_name().to_string_lossy().into_owned();
            let raw = std::fs::read_to_string(file_entry.path())?;
            documents.push(SourceDocument::new(filename, department.clone(), raw));
        }
    }
    if documents.is_empty() {
        return Err("no documents found under the corpus directory".into());
    }

    let embedder = HashedProjectionEmbedder::new(config.embedding_dimension);
    let preparer = DocumentPreparer::new(
        PreparerOptions::from_config(config),
        RoleDepartmentMap::builtin(),
    );
    let artifacts = preparer.prepare(&documents, &embedder)?;

    let label = format!("gen-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let generation = artifacts.write_generation(&config.index_artifacts_path, &label)?;
    info!(
        generation = %generation.display(),
        documents = documents.len(),
        chunks = artifacts.records.len(),
        "index artifacts written and pointer swapped"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Lifecycle {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "failed to install SIGHUP handler, reload disabled");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => Lifecycle::Shutdown,
        _ = hangup.recv() => Lifecycle::Reload,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Lifecycle {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> Lifecycle {
    let _ = tokio::signal::ctrl_c().await;
    Lifecycle::Shutdown
}
