use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use warden_core::WardenError;

use crate::stage::Stage;

const RECORD_SEPARATOR: &str = "-------------------";

/// Append-only record of accepted oracle exchanges.
///
/// The pipeline only ever writes; nothing in Warden reads a log back.
/// Each call must persist one whole record, and records for distinct
/// reference ids never share a key, so implementations need no
/// cross-task coordination beyond what their own storage requires.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Persist one (prompt, response) pair for `reference_id` and `stage`.
    async fn append(
        &self,
        reference_id: &str,
        stage: Stage,
        prompt: &str,
        response: &str,
    ) -> Result<(), WardenError>;
}

/// Writes `<dir>/<reference_id>_<stage>.txt`, one file per key.
///
/// # Examples
///
/// ```no_run
/// use warden_audit::audit_log::{AuditLog, FileAuditLog};
/// use warden_audit::stage::Stage;
///
/// # async fn example() -> Result<(), warden_core::WardenError> {
/// let log = FileAuditLog::new("logs");
/// log.append("Vault", Stage::Proposer, "prompt", "response").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileAuditLog {
    dir: PathBuf,
}

impl FileAuditLog {
    /// Create a log rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that records for `reference_id` at `stage` are appended to.
    pub fn path_for(&self, reference_id: &str, stage: Stage) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.txt",
            sanitize_key(reference_id),
            stage.log_suffix()
        ))
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(
        &self,
        reference_id: &str,
        stage: Stage,
        prompt: &str,
        response: &str,
    ) -> Result<(), WardenError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            WardenError::AuditLog(format!(
                "failed to create log directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let path = self.path_for(reference_id, stage);
        let record = format_record(prompt, response);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                WardenError::AuditLog(format!("failed to open {}: {e}", path.display()))
            })?;
        // Single write of the whole record.
        file.write_all(record.as_bytes()).await.map_err(|e| {
            WardenError::AuditLog(format!("failed to write {}: {e}", path.display()))
        })?;
        file.flush().await.map_err(|e| {
            WardenError::AuditLog(format!("failed to flush {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

fn format_record(prompt: &str, response: &str) -> String {
    format!("Request prompt:\n{prompt}\n\nResponse:\n{response}\n\n{RECORD_SEPARATOR}\n")
}

/// File-name-safe form of a reference id, as used by [`FileAuditLog`].
///
/// Distinct ids can map to the same key (`a b` and `a_b`); callers that
/// need one file per task must keep keys unique, as
/// [`DocumentSource::open`](crate::source::DocumentSource::open) does.
pub fn sanitize_key(reference_id: &str) -> String {
    let cleaned: String = reference_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// One record captured by [`MemoryAuditLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Task reference id.
    pub reference_id: String,
    /// Stage that produced the exchange.
    pub stage: Stage,
    /// Prompt sent to the oracle.
    pub prompt: String,
    /// Accepted response text.
    pub response: String,
}

/// In-memory audit log, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in append order.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(
        &self,
        reference_id: &str,
        stage: Stage,
        prompt: &str,
        response: &str,
    ) -> Result<(), WardenError> {
        self.records.lock().await.push(AuditRecord {
            reference_id: reference_id.to_string(),
            stage,
            prompt: prompt.to_string(),
            response: response.to_string(),
        });
        Ok(())
    }
}

/// Audit log that discards everything (`--no-audit-log`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditLog;

#[async_trait]
impl AuditLog for NullAuditLog {
    async fn append(&self, _: &str, _: Stage, _: &str, _: &str) -> Result<(), WardenError> {
        Ok(())
    }
}
