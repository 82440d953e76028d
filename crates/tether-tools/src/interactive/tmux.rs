//! tmux-backed multiplexer

use super::multiplexer::{BackingSpec, Multiplexer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Drives a local tmux server through its CLI.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
}

impl TmuxMultiplexer {
    /// Use `tmux` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("tmux")
    }

    /// Use a specific tmux binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn tmux(&self, session: &str, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "tmux");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: self.binary.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing_session(&stderr) {
            return Err(Error::SessionNotFound(session.to_string()));
        }
        Err(Error::Multiplexer(format!("tmux {}: {}", args[0], stderr)))
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn create(&self, spec: &BackingSpec) -> Result<()> {
        let workdir = spec.workdir.to_string_lossy();
        self.tmux(
            &spec.name,
            &[
                "new-session",
                "-d",
                "-s",
                spec.name.as_str(),
                "-c",
                &*workdir,
                spec.command.as_str(),
            ],
        )
        .await?;
        if let Some(log) = &spec.log_file {
            let sink = log_sink_command(log);
            let pane = exact_pane(&spec.name);
            self.tmux(&spec.name, &["pipe-pane", "-o", "-t", pane.as_str(), sink.as_str()])
                .await?;
        }
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> Result<bool> {
        let target = exact(name);
        match self.tmux(name, &["has-session", "-t", target.as_str()]).await {
            Ok(_) => Ok(true),
            Err(Error::SessionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn send_input(&self, name: &str, text: &str) -> Result<()> {
        let pane = exact_pane(name);
        self.tmux(name, &["send-keys", "-t", pane.as_str(), "-l", "--", text])
            .await?;
        self.tmux(name, &["send-keys", "-t", pane.as_str(), "Enter"])
            .await?;
        Ok(())
    }

    async fn capture(&self, name: &str, lines: usize) -> Result<String> {
        let start = format!("-{}", lines);
        let pane = exact_pane(name);
        self.tmux(
            name,
            &["capture-pane", "-p", "-J", "-t", pane.as_str(), "-S", start.as_str()],
        )
        .await
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        let target = exact(name);
        self.tmux(name, &["kill-session", "-t", target.as_str()]).await?;
        Ok(())
    }
}

/// Exact-match session target (`=name`), so `foo` never selects `foobar`.
fn exact(name: &str) -> String {
    format!("={}", name)
}

/// Active pane of the exactly-named session (`=name:`).
fn exact_pane(name: &str) -> String {
    format!("={}:", name)
}

fn is_missing_session(stderr: &str) -> bool {
    stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("no server running")
        || stderr.contains("can't find pane")
        || stderr.contains("error connecting to")
}

/// Shell command given to `pipe-pane`.
fn log_sink_command(path: &Path) -> String {
    format!("cat >> {}", shell_quote(&path.to_string_lossy()))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
