//! Append-only audit log.
//!
//! Recording never waits on disk: entries go over an unbounded channel to a
//! single writer task which appends one JSON object per line. Because only
//! that task touches the file and each line is written with one `write_all`,
//! records never interleave. Write failures are logged and dropped; they
//! never fail the operation being audited.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::AuditConfig;

pub const COMMAND_EXECUTION: &str = "COMMAND_EXECUTION";
pub const FILE_OPERATION: &str = "FILE_OPERATION";

/// Security events, recorded as `SECURITY_<KIND>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    CommandBlocked,
    PathBlocked,
    RateLimitExceeded,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::CommandBlocked => "COMMAND_BLOCKED",
            SecurityEvent::PathBlocked => "PATH_BLOCKED",
            SecurityEvent::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }

    pub fn event_name(&self) -> String {
        format!("SECURITY_{}", self.as_str())
    }
}

/// One audit record. Written once, never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub target: Option<String>,
    pub actor: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AuditEntry {
    pub fn builder(event: impl Into<String>) -> AuditEntryBuilder {
        AuditEntryBuilder::new(event)
    }
}

/// ```ignore
/// let entry = AuditEntry::builder(COMMAND_EXECUTION)
///     .target("prod")
///     .field("command", "uptime")
///     .field("exit_code", 0)
///     .build();
/// ```
pub struct AuditEntryBuilder {
    event: String,
    target: Option<String>,
    actor: Option<String>,
    fields: Map<String, Value>,
}

impl AuditEntryBuilder {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            target: None,
            actor: None,
            fields: Map::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Defaults to the logger's configured actor when unset.
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event: self.event,
            target: self.target,
            actor: self.actor.unwrap_or_default(),
            fields: self.fields,
        }
    }
}

enum AuditCommand {
    Write(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

/// Cheap to clone; all clones feed the same writer task.
#[derive(Clone)]
pub struct AuditLogger {
    tx: Option<mpsc::UnboundedSender<AuditCommand>>,
    actor: String,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.is_enabled())
            .field("actor", &self.actor)
            .finish()
    }
}

impl AuditLogger {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    ///
    /// The task ends once every clone of the logger is dropped.
    pub fn new(config: AuditConfig) -> (Self, Option<JoinHandle<()>>) {
        if !config.enabled {
            debug!("Audit logging disabled");
            return (
                Self {
                    tx: None,
                    actor: config.actor,
                },
                None,
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(config.file, rx));

        (
            Self {
                tx: Some(tx),
                actor: config.actor,
            },
            Some(handle),
        )
    }

    /// A logger that drops every entry.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            actor: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an entry. Returns immediately.
    pub fn record(&self, mut entry: AuditEntry) {
        let Some(ref tx) = self.tx else {
            return;
        };

        if entry.actor.is_empty() {
            entry.actor = self.actor.clone();
        }

        if tx.send(AuditCommand::Write(Box::new(entry))).is_err() {
            warn!("Audit writer has stopped, entry dropped");
        }
    }

    /// `elevated` records whether sudo was requested; the command is the
    /// caller's text, never the sudo wrapper.
    pub fn log_command_execution(
        &self,
        target: &str,
        command: &str,
        elevated: bool,
        status: &str,
        exit_code: i32,
    ) {
        self.record(
            AuditEntry::builder(COMMAND_EXECUTION)
                .target(target)
                .field("command", command)
                .field("sudo", elevated)
                .field("status", status)
                .field("exit_code", exit_code)
                .build(),
        );
    }

    pub fn log_file_operation(&self, target: &str, operation: &str, path: &str) {
        self.record(
            AuditEntry::builder(FILE_OPERATION)
                .target(target)
                .field("operation", operation)
                .field("path", path)
                .build(),
        );
    }

    pub fn log_security_event(&self, event: SecurityEvent, target: Option<&str>, details: &str) {
        let mut builder = AuditEntry::builder(event.event_name()).field("details", details);
        if let Some(target) = target {
            builder = builder.target(target);
        }
        self.record(builder.build());
    }

    /// Wait until everything queued before this call is on disk.
    pub async fn flush(&self) {
        let Some(ref tx) = self.tx else {
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(AuditCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<AuditCommand>) {
    let mut file: Option<File> = None;

    while let Some(command) = rx.recv().await {
        match command {
            AuditCommand::Write(entry) => {
                if let Err(e) = append_entry(&path, &mut file, &entry).await {
                    error!("Failed to write audit log {}: {}", path.display(), e);
                    // Reopen on the next entry
                    file = None;
                }
            }
            AuditCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Audit writer stopped");
}

async fn append_entry(
    path: &Path,
    file: &mut Option<File>,
    entry: &AuditEntry,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    if file.is_none() {
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        *file = Some(opened);
    }

    if let Some(f) = file.as_mut() {
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
    }
    Ok(())
}
