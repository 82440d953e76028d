use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the single interactive session.
///
/// Transitions are `Stopped → Starting → Running → Stopped`; a failed start
/// or a lost backing session also returns to `Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No backing session
    #[default]
    Stopped,
    /// Backing session requested, not yet ready
    Starting,
    /// Accepting input
    Running,
}

impl SessionState {
    /// Lowercase name, as used in messages and audit records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
