use crate::error::{Error, Result};
use crate::output::marker_len;
use std::path::PathBuf;
use std::time::Duration;

/// Interactive session settings.
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    /// Fixed name of the backing multiplexer session
    pub session_name: String,
    /// Command started inside the backing session
    pub command: String,
    /// Scrollback lines read per capture
    pub capture_lines: usize,
    /// Wait after sending input before the first capture
    pub settle_delay: Duration,
    /// Upper bound on waiting for output to settle
    pub max_wait: Duration,
    /// Upper bound on waiting for a new backing session to come up
    pub ready_timeout: Duration,
    /// Reply bound, in lines
    pub reply_max_lines: usize,
    /// Reply bound, in characters
    pub reply_max_chars: usize,
    /// Append-only copy of the session's output
    pub log_file: Option<PathBuf>,
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            session_name: "tether-claude".to_string(),
            command: "claude".to_string(),
            capture_lines: 200,
            settle_delay: Duration::from_secs(3),
            max_wait: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(10),
            reply_max_lines: 40,
            reply_max_chars: 4000,
            log_file: None,
        }
    }
}

impl InteractiveConfig {
    /// Reject settings the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_session_name(&self.session_name) {
            return Err(Error::Config(format!(
                "interactive.session_name '{}' must be [A-Za-z0-9_-]+",
                self.session_name
            )));
        }
        if self.command.trim().is_empty() {
            return Err(Error::Config("interactive.command must not be empty".to_string()));
        }
        if self.capture_lines == 0 || self.reply_max_lines == 0 {
            return Err(Error::Config(
                "interactive.capture_lines and reply_max_lines must be > 0".to_string(),
            ));
        }
        if self.reply_max_chars <= marker_len() {
            return Err(Error::Config(format!(
                "interactive.reply_max_chars must be > {}",
                marker_len()
            )));
        }
        if self.settle_delay.is_zero() || self.max_wait.is_zero() || self.ready_timeout.is_zero()
        {
            return Err(Error::Config(
                "interactive delays and timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// tmux rejects `.` and `:` in session names; keep to a safe subset.
pub(crate) fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
