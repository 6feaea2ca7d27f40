//! Service configuration.
//!
//! [`ServiceConfig`] carries every tunable the service reads at startup, and
//! [`ConfigBuilder`] resolves it from multiple sources (later wins):
//!
//! 1. Compiled defaults
//! 2. Config file (`corpusgate.toml`, `.yaml`, or `.json`)
//! 3. Environment variables (`CORPUSGATE_*`)
//!
//! Everything is immutable after [`ConfigBuilder::build`] returns; the rest of
//! the service receives the config behind an `Arc` and never writes to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Failed to parse configuration
    #[error("failed to parse {format} config: {source}")]
    ParseError {
        /// Format that failed to parse (YAML, TOML, JSON)
        format: String,
        /// Underlying parse error
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unsupported or unrecognised configuration file extension
    #[error("unsupported config file format: {message}")]
    UnsupportedFormat {
        /// Description of the problem
        message: String,
    },

    /// Configuration validation failed
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A constraint that spans multiple fields was violated
    #[error("invalid configuration: {message}")]
    Constraint {
        /// Description of the violated constraint
        message: String,
    },

    /// Environment variable parsing error
    #[error("failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// Environment variable key
        key: String,
        /// Error message
        message: String,
    },
}

/// Signature algorithm for session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningAlgorithm {
    Hs256,
    Hs384,
    Hs512,
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        Self::Hs256
    }
}

/// How chunk identifiers are derived during ingestion.
///
/// `Ordinal` ids (`FINANCE_CHUNK_17`) are easy to eyeball but shift whenever a
/// source document is added or removed. `ContentHash` ids survive rebuilds as
/// long as the chunk text itself is unchanged, which matters when citations
/// are stored downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkIdScheme {
    Ordinal,
    ContentHash,
}

impl Default for ChunkIdScheme {
    fn default() -> Self {
        Self::Ordinal
    }
}

/// The complete configuration surface of the service.
#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServiceConfig {
    /// Dimension of every stored and query embedding.
    #[validate(range(min = 8, max = 4096))]
    pub embedding_dimension: usize,

    /// Candidates scoring below this cosine similarity are dropped.
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// `top_k` applied when a query omits it.
    #[validate(range(min = 1, max = 20))]
    pub top_k_default: usize,

    /// Access token lifetime in seconds.
    #[validate(range(min = 60))]
    pub access_token_ttl_seconds: u64,

    /// Refresh token lifetime in seconds.
    #[validate(range(min = 300))]
    pub refresh_token_ttl_seconds: u64,

    /// HMAC secret for token signing. Never logged.
    #[validate(length(min = 16))]
    pub signing_key: String,

    /// Token signature algorithm.
    pub signing_algorithm: SigningAlgorithm,

    /// Target chunk size in tokens.
    #[validate(range(min = 300, max = 512))]
    pub chunk_target_tokens: usize,

    /// Overlap between consecutive chunks in tokens.
    pub chunk_overlap_tokens: usize,

    /// Chunk identifier derivation scheme.
    pub chunk_id_scheme: ChunkIdScheme,

    /// Optional path to an RBAC config JSON file; compiled defaults otherwise.
    pub rbac_config_path: Option<PathBuf>,

    /// Directory holding index artifact generations and the `current` pointer.
    pub index_artifacts_path: PathBuf,

    /// SQLite file backing the user table.
    pub users_db_path: PathBuf,

    /// Query request deadline in milliseconds.
    #[validate(range(min = 100))]
    pub request_deadline_query_ms: u64,

    /// Login request deadline in milliseconds.
    #[validate(range(min = 100))]
    pub request_deadline_login_ms: u64,

    /// In-flight request cap; requests beyond it are shed with 503.
    #[validate(range(min = 1))]
    pub max_concurrent_requests: usize,

    /// Directory receiving the per-kind JSONL audit files.
    pub audit_sink_path: PathBuf,

    /// Listen address for the HTTP server.
    #[validate(length(min = 1))]
    pub bind_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 384,
            similarity_threshold: 0.35,
            top_k_default: 5,
            access_token_ttl_seconds: 15 * 60,
            refresh_token_ttl_seconds: 7 * 24 * 60 * 60,
            signing_key: String::new(),
            signing_algorithm: SigningAlgorithm::default(),
            chunk_target_tokens: 512,
            chunk_overlap_tokens: 50,
            chunk_id_scheme: ChunkIdScheme::default(),
            rbac_config_path: None,
            index_artifacts_path: PathBuf::from("./data/index"),
            users_db_path: PathBuf::from("./data/users.db"),
            request_deadline_query_ms: 30_000,
            request_deadline_login_ms: 10_000,
            max_concurrent_requests: 256,
            audit_sink_path: PathBuf::from("./data/audit"),
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

// The signing key must never end up in logs or panic messages.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("embedding_dimension", &self.embedding_dimension)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("top_k_default", &self.top_k_default)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("signing_key", &"<redacted>")
            .field("signing_algorithm", &self.signing_algorithm)
            .field("chunk_target_tokens", &self.chunk_target_tokens)
            .field("chunk_overlap_tokens", &self.chunk_overlap_tokens)
            .field("chunk_id_scheme", &self.chunk_id_scheme)
            .field("rbac_config_path", &self.rbac_config_path)
            .field("index_artifacts_path", &self.index_artifacts_path)
            .field("users_db_path", &self.users_db_path)
            .field("request_deadline_query_ms", &self.request_deadline_query_ms)
            .field("request_deadline_login_ms", &self.request_deadline_login_ms)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("audit_sink_path", &self.audit_sink_path)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

/// Builder resolving a [`ServiceConfig`] from defaults, file, and environment.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base: ServiceConfig,
    use_env: bool,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ServiceConfig::default(),
            use_env: false,
        }
    }

    /// Load configuration from a file (YAML, TOML, or JSON).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ServiceConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "YAML".to_string(),
                    source: Box::new(e),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                format: "TOML".to_string(),
                source: Box::new(e),
            })?,
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "JSON".to_string(),
                    source: Box::new(e),
                })?
            }
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    message: "file extension must be .yaml, .yml, .toml, or .json".to_string(),
                });
            }
        };

        self.base = config;
        Ok(self)
    }

    /// Enable overrides from `CORPUSGATE_*` environment variables.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Build the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails or an environment variable
    /// cannot be parsed.
    pub fn build(mut self) -> Result<ServiceConfig, ConfigError> {
        if self.use_env {
            dotenvy::dotenv().ok(); // Load .env file if present

            if let Ok(key) = std::env::var("CORPUSGATE_SIGNING_KEY") {
                self.base.signing_key = key;
            }

            if let Ok(addr) = std::env::var("CORPUSGATE_BIND_ADDR") {
                self.base.bind_addr = addr;
            }

            if let Ok(raw) = std::env::var("CORPUSGATE_MAX_CONCURRENT_REQUESTS") {
                self.base.max_concurrent_requests =
                    raw.parse().map_err(|_| ConfigError::EnvParse {
                        key: "CORPUSGATE_MAX_CONCURRENT_REQUESTS".to_string(),
                        message: "must be a positive integer".to_string(),
                    })?;
            }

            if let Ok(raw) = std::env::var("CORPUSGATE_SIMILARITY_THRESHOLD") {
                self.base.similarity_threshold =
                    raw.parse().map_err(|_| ConfigError::EnvParse {
                        key: "CORPUSGATE_SIMILARITY_THRESHOLD".to_string(),
                        message: "must be a float in [0.0, 1.0]".to_string(),
                    })?;
            }

            if let Ok(raw) = std::env::var("CORPUSGATE_INDEX_ARTIFACTS_PATH") {
                self.base.index_artifacts_path = PathBuf::from(raw);
            }

            if let Ok(raw) = std::env::var("CORPUSGATE_USERS_DB_PATH") {
                self.base.users_db_path = PathBuf::from(raw);
            }

            if let Ok(raw) = std::env::var("CORPUSGATE_AUDIT_SINK_PATH") {
                self.base.audit_sink_path = PathBuf::from(raw);
            }
        }

        self.base.validate()?;

        // Cross-field constraints that the derive can't express.
        if self.base.chunk_overlap_tokens >= self.base.chunk_target_tokens {
            return Err(ConfigError::Constraint {
                message: format!(
                    "chunk_overlap_tokens ({}) must be smaller than chunk_target_tokens ({})",
                    self.base.chunk_overlap_tokens, self.base.chunk_target_tokens
                ),
            });
        }

        Ok(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key(mut config: ServiceConfig) -> ServiceConfig {
        config.signing_key = "test-signing-key-0123456789".to_string();
        config
    }

    #[test]
    fn defaults_validate_once_key_is_set() {
        let config = with_key(ServiceConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.top_k_default, 5);
        assert_eq!(config.signing_algorithm, SigningAlgorithm::Hs256);
    }

    #[test]
    fn missing_signing_key_is_rejected() {
        let err = ConfigBuilder::new().build();
        assert!(err.is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_target() {
        let mut builder = ConfigBuilder::new();
        builder.base = with_key(ServiceConfig::default());
        builder.base.chunk_overlap_tokens = 512;
        let err = builder.build().unwrap_err();
        assert!(matches!(err, ConfigError::Constraint { .. }));
    }

    #[test]
    fn toml_round_trip() {
        let config = with_key(ServiceConfig::default());
        let encoded = toml::to_string(&config).unwrap();
        let decoded: ServiceConfig = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.chunk_target_tokens, config.chunk_target_tokens);
        assert_eq!(decoded.bind_addr, config.bind_addr);
    }

    #[test]
    fn debug_redacts_signing_key() {
        let config = with_key(ServiceConfig::default());
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("test-signing-key"));
    }

    #[test]
    fn chunk_id_scheme_serializes_snake_case() {
        let json = serde_json::to_string(&ChunkIdScheme::ContentHash).unwrap();
        assert_eq!(json, r#""content_hash""#);
    }
}
