//! Audit Log
//!
//! One self-describing JSON line per decision or outcome, one file per UTC
//! day (`audit_YYYYMMDD.jsonl`). Records are never rewritten. Retention is
//! left to external housekeeping.
//!
//! Appends go through a single writer lock and each record is written with
//! one `write_all`, so lines never interleave and file order matches the
//! order in which callers finished.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_tools::output::redact_secrets;
use tether_tools::{DenyOrigin, ExecutionResult, ExitStatus, OperatorId};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Longest command text kept in a record.
pub const MAX_AUDIT_COMMAND_CHARS: usize = 2000;

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// One-shot run of the external tool
    Run,
    /// File download
    Pull,
    /// File upload
    Push,
    /// Session pinned
    SessionPin,
    /// Session pin cleared
    SessionUnpin,
    /// Recent sessions listed
    SessionsList,
    /// Interactive session start
    TuiStart,
    /// Input sent to the interactive session
    TuiSend,
    /// Interactive session tail read
    TuiCapture,
    /// Interactive session stop
    TuiStop,
    /// Interactive session found dead and reset to stopped
    SessionReset,
    /// Process startup
    Startup,
}

/// Gate/validator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Request passed every check
    Allow,
    /// Request was refused
    Deny,
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id
    pub id: Uuid,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    /// Who asked
    pub operator: OperatorId,
    /// What was asked
    pub action: AuditAction,
    /// Redacted, length-capped command or argument
    pub command: String,
    /// Allow or deny
    pub decision: Decision,
    /// Component that refused, when denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<DenyOrigin>,
    /// Outcome label (`success`, `timed_out`, ...)
    pub outcome: String,
    /// Exit code of a non-zero exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Free-form summary (deny reason, session id, file size, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    /// New allow/success record, stamped now.
    pub fn new(operator: OperatorId, action: AuditAction, command: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operator,
            action,
            command: summarize_command(command),
            decision: Decision::Allow,
            denied_by: None,
            outcome: "success".to_string(),
            exit_code: None,
            duration_ms: 0,
            detail: None,
        }
    }

    /// Fill decision and outcome from an execution result.
    #[must_use]
    pub fn with_result(mut self, result: &ExecutionResult) -> Self {
        self.outcome = result.exit_status.label().to_string();
        self.duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX);
        match &result.exit_status {
            ExitStatus::Denied { reason } => {
                self.decision = Decision::Deny;
                self.denied_by = Some(reason.origin());
                self.detail = Some(reason.to_string());
            }
            ExitStatus::NonZeroExit { code } => self.exit_code = Some(*code),
            ExitStatus::InternalError { kind } => self.detail = Some(format!("{:?}", kind)),
            ExitStatus::Success | ExitStatus::TimedOut => {}
        }
        self
    }

    /// Attach a summary, appended to any deny reason already present.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.detail = Some(match self.detail.take() {
            Some(existing) => format!("{}; {}", existing, detail),
            None => detail,
        });
        self
    }
}

/// Redact credentials and cap the length, keeping the head.
fn summarize_command(command: &str) -> String {
    let redacted = redact_secrets(command.trim());
    if redacted.chars().count() <= MAX_AUDIT_COMMAND_CHARS {
        return redacted;
    }
    let mut head: String = redacted.chars().take(MAX_AUDIT_COMMAND_CHARS - 3).collect();
    head.push_str("...");
    head
}

struct DayFile {
    date: NaiveDate,
    file: File,
}

/// Append-only audit trail.
pub struct AuditLog {
    dir: PathBuf,
    writer: Mutex<Option<DayFile>>,
}

impl AuditLog {
    /// Open (creating if needed) the audit directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Error::Audit {
                path: dir.clone(),
                source,
            })?;
        Ok(Self {
            dir,
            writer: Mutex::new(None),
        })
    }

    /// Audit directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the records of `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit_{}.jsonl", date.format("%Y%m%d")))
    }

    /// Append one record to the file of its UTC day.
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let date = record.timestamp.date_naive();

        let mut writer = self.writer.lock().await;
        if writer.as_ref().map(|w| w.date) != Some(date) {
            let path = self.file_for(date);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|source| Error::Audit {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Opened audit file");
            *writer = Some(DayFile { date, file });
        }

        if let Some(day) = writer.as_mut() {
            let path = self.file_for(date);
            let written = match day.file.write_all(line.as_bytes()).await {
                Ok(()) => day.file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(source) = written {
                // reopen on the next append
                *writer = None;
                return Err(Error::Audit { path, source });
            }
        }
        Ok(())
    }

    /// All records of `date`, in append order. A missing file is empty.
    pub async fn read_day(&self, date: NaiveDate) -> Result<Vec<AuditRecord>> {
        let path = self.file_for(date);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::Audit { path, source }),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }
}
