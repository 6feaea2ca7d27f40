//! Audit trail with at-least-once delivery.
//!
//! Request paths never block on audit I/O: they push [`AuditEvent`]s into a
//! flume channel via a cheap [`AuditHandle`], and a background worker drains
//! the channel into one or more [`AuditSink`]s. A sink failure is logged and
//! does not stop delivery to the remaining sinks.
//!
//! ```text
//! login / query handlers ──emit──► flume channel ──► drain worker
//!                                                       ├─► JSONL files (one per kind)
//!                                                       └─► MemorySink (tests)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fs::{File, OpenOptions};
use std::io::{Result as IoResult, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// One audit record. Serialized with a `kind` discriminator so each JSONL
/// line is self-contained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A login or refresh attempt.
    AuthAttempt {
        timestamp: DateTime<Utc>,
        username: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A per-chunk access decision made during retrieval.
    AccessDecision {
        timestamp: DateTime<Utc>,
        username: String,
        chunk_id: String,
        department: String,
        allowed: bool,
    },
    /// A retrieval request that ran to completion.
    QueryCompleted {
        timestamp: DateTime<Utc>,
        username: String,
        variants: usize,
        pool_size: usize,
        returned: usize,
    },
}

impl AuditEvent {
    pub fn auth_attempt(
        username: impl Into<String>,
        success: bool,
        reason: Option<String>,
    ) -> Self {
        Self::AuthAttempt {
            timestamp: Utc::now(),
            username: username.into(),
            success,
            reason,
        }
    }

    pub fn access_decision(
        username: impl Into<String>,
        chunk_id: impl Into<String>,
        department: impl Into<String>,
        allowed: bool,
    ) -> Self {
        Self::AccessDecision {
            timestamp: Utc::now(),
            username: username.into(),
            chunk_id: chunk_id.into(),
            department: department.into(),
            allowed,
        }
    }

    pub fn query_completed(
        username: impl Into<String>,
        variants: usize,
        pool_size: usize,
        returned: usize,
    ) -> Self {
        Self::QueryCompleted {
            timestamp: Utc::now(),
            username: username.into(),
            variants,
            pool_size,
            returned,
        }
    }

    /// Short label used for metrics and file routing.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::AuthAttempt { .. } => "auth_attempt",
            Self::AccessDecision { .. } => "access_decision",
            Self::QueryCompleted { .. } => "query_completed",
        }
    }
}

/// An output target consuming audit events.
///
/// Implementations may block; they run on the drain worker, never on a
/// request task.
pub trait AuditSink: Send {
    /// Handle one event. The sink decides how to serialize it.
    fn handle(&mut self, event: &AuditEvent) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// JSONL sink writing one append-only file per event kind under a directory.
///
/// All three files (`auth_attempt.jsonl`, `access_decision.jsonl`,
/// `query_completed.jsonl`) are opened at construction and flushed after
/// every line, so a crash loses at most the event being written.
pub struct JsonLinesDirSink {
    dir: PathBuf,
    auth: File,
    access: File,
    query: File,
}

impl JsonLinesDirSink {
    /// Create a sink rooted at `dir`, creating the directory and the three
    /// kind files if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or any file cannot be created.
    pub fn create(dir: impl AsRef<Path>) -> IoResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let open = |kind: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(format!("{kind}.jsonl")))
        };
        Ok(Self {
            auth: open("auth_attempt")?,
            access: open("access_decision")?,
            query: open("query_completed")?,
            dir,
        })
    }

    fn file_for(&mut self, kind: &str) -> &mut File {
        match kind {
            "auth_attempt" => &mut self.auth,
            "access_decision" => &mut self.access,
            _ => &mut self.query,
        }
    }
}

impl AuditSink for JsonLinesDirSink {
    fn handle(&mut self, event: &AuditEvent) -> IoResult<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let file = self.file_for(event.kind_label());
        writeln!(file, "{line}")?;
        file.flush()
    }

    fn name(&self) -> String {
        format!("JsonLinesDirSink({})", self.dir.display())
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events. Clones the buffer so callers can
    /// inspect state without holding the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.entries.lock().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for MemorySink {
    fn handle(&mut self, event: &AuditEvent) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// Cheap, cloneable emitter handed to every component that audits.
#[derive(Clone)]
pub struct AuditHandle {
    tx: flume::Sender<AuditEvent>,
}

impl AuditHandle {
    /// Emit an event. Never blocks and never fails the caller; a
    /// disconnected bus only produces a warning.
    pub fn emit(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            warn!("audit bus disconnected, event dropped");
        }
    }

    /// A handle wired to nothing; events are discarded. Test-friendly.
    #[must_use]
    pub fn disconnected() -> Self {
        let (tx, _rx) = flume::unbounded();
        Self { tx }
    }
}

/// Owns the drain worker and the sending side of the channel.
pub struct AuditBus {
    tx: flume::Sender<AuditEvent>,
    worker: JoinHandle<()>,
}

impl AuditBus {
    /// Spawn the drain worker over the given sinks. Requires a Tokio runtime.
    #[must_use]
    pub fn spawn(mut sinks: Vec<Box<dyn AuditSink>>) -> Self {
        let (tx, rx) = flume::unbounded::<AuditEvent>();
        let worker = tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                for sink in &mut sinks {
                    if let Err(err) = sink.handle(&event) {
                        warn!(sink = %sink.name(), %err, "audit sink write failed");
                    }
                }
            }
        });
        Self { tx, worker }
    }

    /// A new emitter for this bus.
    #[must_use]
    pub fn handle(&self) -> AuditHandle {
        AuditHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drop the bus-owned sender and wait for the worker to drain. Completes
    /// once every outstanding [`AuditHandle`] is gone and the channel is
    /// empty.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}
