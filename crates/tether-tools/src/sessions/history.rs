//! Session listing from the external tool's home directory
//!
//! Layout read here:
//! - `session-env/<id>/`: one directory per live session (its mtime is the
//!   fallback activity time)
//! - `sessions/<id>.json`: `id`, `title`, `updatedAt`, `createdAt`
//! - `history.jsonl`: prompt history with `sessionId`, `display`, `timestamp`
//!   (epoch milliseconds), used when no session file exists

use super::{SessionSource, SessionSummary};
use crate::error::{Error, Result};
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    id: Option<String>,
    title: Option<String>,
    updated_at: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    session_id: Option<String>,
    display: Option<String>,
    timestamp: Option<i64>,
}

/// Reads sessions from the tool's data directory (`~/.claude` by default).
#[derive(Debug, Clone)]
pub struct ToolHistorySource {
    root: PathBuf,
}

impl ToolHistorySource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Source rooted at `~/.claude`, if a home directory is known.
    #[must_use]
    pub fn from_home() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".claude")))
    }

    /// Data directory being read.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SessionSource for ToolHistorySource {
    async fn recent_sessions(&self, active_within: Duration) -> Result<Vec<SessionSummary>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan(&root, Utc::now(), active_within))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

/// Synchronous scan, `now` injected for tests.
pub(crate) fn scan(
    root: &Path,
    now: DateTime<Utc>,
    active_within: Duration,
) -> Result<Vec<SessionSummary>> {
    let env_dir = root.join("session-env");
    let entries = match std::fs::read_dir(&env_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %env_dir.display(), "No session-env directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let live: Vec<(String, DateTime<Utc>)> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let mtime = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((name, DateTime::<Utc>::from(mtime)))
        })
        .collect();
    if live.is_empty() {
        return Ok(Vec::new());
    }

    let history = read_history(&root.join("history.jsonl"));
    let cutoff = now
        - chrono::Duration::from_std(active_within.max(Duration::from_secs(60)))
            .unwrap_or_else(|_| chrono::Duration::minutes(1));

    let mut sessions: Vec<SessionSummary> = live
        .into_iter()
        .map(|(sid, mtime)| summarize(root, &sid, mtime, &history))
        .filter(|s| s.updated_at >= cutoff)
        .collect();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(sessions)
}

fn summarize(
    root: &Path,
    sid: &str,
    mtime: DateTime<Utc>,
    history: &HashMap<String, (String, Option<DateTime<Utc>>)>,
) -> SessionSummary {
    let session_path = root.join("sessions").join(format!("{}.json", sid));
    if session_path.is_file() {
        let parsed = std::fs::read_to_string(&session_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<SessionFile>(&raw).ok());
        return match parsed {
            Some(file) => SessionSummary {
                id: SessionId::new(file.id.unwrap_or_else(|| sid.to_string())),
                title: file
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "(no title)".to_string()),
                updated_at: parse_ts(file.updated_at.as_deref())
                    .or_else(|| parse_ts(file.created_at.as_deref()))
                    .unwrap_or(mtime),
            },
            None => SessionSummary {
                id: SessionId::new(sid),
                title: "(unreadable)".to_string(),
                updated_at: mtime,
            },
        };
    }

    let (title, ts) = history
        .get(sid)
        .cloned()
        .unwrap_or_else(|| ("(no session file)".to_string(), None));
    SessionSummary {
        id: SessionId::new(sid),
        title,
        updated_at: ts.unwrap_or(mtime),
    }
}

/// Last title and timestamp per session id. Malformed lines are skipped.
fn read_history(path: &Path) -> HashMap<String, (String, Option<DateTime<Utc>>)> {
    let mut map = HashMap::new();
    let Ok(raw) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(entry) = serde_json::from_str::<HistoryEntry>(line) else {
            continue;
        };
        let Some(sid) = entry.session_id.filter(|s| !s.is_empty()) else {
            continue;
        };
        let title = entry
            .display
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "(no title)".to_string());
        let ts = entry
            .timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        map.insert(sid, (title, ts));
    }
    map
}

fn parse_ts(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
