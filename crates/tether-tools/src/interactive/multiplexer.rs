use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// What to create when a new backing session is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingSpec {
    /// Session name
    pub name: String,
    /// Working directory of the session's first window
    pub workdir: PathBuf,
    /// Command run in that window
    pub command: String,
    /// File receiving a copy of everything the session prints
    pub log_file: Option<PathBuf>,
}

/// Control interface of a terminal multiplexer.
///
/// Operations on a session that does not exist fail with
/// [`Error::SessionNotFound`](crate::Error::SessionNotFound).
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session.
    async fn create(&self, spec: &BackingSpec) -> Result<()>;

    /// Whether the named session exists.
    async fn is_alive(&self, name: &str) -> Result<bool>;

    /// Type `text` into the session and press Enter.
    async fn send_input(&self, name: &str, text: &str) -> Result<()>;

    /// Last `lines` lines of the visible pane plus scrollback.
    async fn capture(&self, name: &str, lines: usize) -> Result<String>;

    /// Kill the session.
    async fn destroy(&self, name: &str) -> Result<()>;
}
