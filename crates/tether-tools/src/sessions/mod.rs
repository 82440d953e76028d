//! External session tracking
//!
//! The external CLI tool owns its conversations; we only list the ones it
//! reports and remember which one an operator wants new commands bound to.

mod history;
mod registry;

#[cfg(test)]
mod tests;

pub use history::ToolHistorySource;
pub use registry::{PinScope, SessionRegistry, MAX_LIST_LIMIT};

use crate::error::Result;
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Maximum title length shown in listings, in characters
pub const MAX_TITLE_CHARS: usize = 80;

/// One session as reported by the external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session id, usable as a pin or `--session` target
    pub id: SessionId,
    /// Single-line title
    pub title: String,
    /// Last activity
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    /// `id | title | updated: 2026-01-31T14` line used by the operator console.
    #[must_use]
    pub fn display_line(&self) -> String {
        format!(
            "{} | {} | updated: {}",
            self.id,
            normalize_title(&self.title),
            self.updated_at.format("%Y-%m-%dT%H")
        )
    }
}

/// Where session listings come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Sessions active within `active_within`, in any order.
    async fn recent_sessions(&self, active_within: Duration) -> Result<Vec<SessionSummary>>;
}

/// Collapse whitespace, hide pasted blobs and cut to [`MAX_TITLE_CHARS`].
#[must_use]
pub fn normalize_title(raw: &str) -> String {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.starts_with("[Pasted text") {
        return "(pasted text)".to_string();
    }
    if text.chars().count() > MAX_TITLE_CHARS {
        let mut cut: String = text.chars().take(MAX_TITLE_CHARS).collect();
        cut.push('…');
        return cut;
    }
    text
}
