//! Application configuration types
//!
//! Raw, serde-facing structures. Nothing here is trusted until
//! [`validation`](super::validation) has turned it into runtime settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tether_tools::PinScope;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub exec: ExecAppConfig,
    #[serde(default)]
    pub interactive: InteractiveAppConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Access control and sandbox policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Confinement root (`~` is expanded)
    pub workspace_dir: String,
    /// Whitelisted operator ids; empty admits everyone
    pub authorized_operators: Vec<String>,
    /// Denylisted command patterns
    pub blocked_commands: Vec<String>,
    /// Denylisted path prefixes (`*` matches one component)
    pub blocked_paths: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            workspace_dir: "~/tether_workspace".to_string(),
            authorized_operators: Vec::new(),
            blocked_commands: ["rm -rf", "sudo", "nc", "ncat"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            blocked_paths: ["/System", "/Users/*/Library", "/private", "/etc"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// One-shot execution of the external tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecAppConfig {
    pub program: String,
    pub prompt_args: Vec<String>,
    pub session_args: Vec<String>,
    pub continue_args: Vec<String>,
    pub timeout_secs: u64,
    pub kill_grace_ms: u64,
    pub max_output_chars: usize,
    pub strip_env: Vec<String>,
}

impl Default for ExecAppConfig {
    fn default() -> Self {
        let defaults = tether_tools::ExecConfig::default();
        Self {
            program: defaults.program,
            prompt_args: defaults.prompt_args,
            session_args: defaults.session_args,
            continue_args: defaults.continue_args,
            timeout_secs: defaults.default_timeout.as_secs(),
            kill_grace_ms: u64::try_from(defaults.kill_grace.as_millis()).unwrap_or(2000),
            max_output_chars: defaults.max_output_chars,
            strip_env: defaults.strip_env,
        }
    }
}

/// Interactive (tmux) session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractiveAppConfig {
    pub tmux_binary: String,
    pub session_name: String,
    pub command: String,
    pub capture_lines: usize,
    pub settle_delay_ms: u64,
    pub max_wait_secs: u64,
    pub ready_timeout_secs: u64,
    pub reply_max_lines: usize,
    pub reply_max_chars: usize,
    /// Backing session log, relative to the audit directory; empty disables it
    pub log_file: String,
    /// Deadline of one interactive operation
    pub timeout_secs: u64,
}

impl Default for InteractiveAppConfig {
    fn default() -> Self {
        Self {
            tmux_binary: "tmux".to_string(),
            session_name: "tether-claude".to_string(),
            command: "claude".to_string(),
            capture_lines: 200,
            settle_delay_ms: 3000,
            max_wait_secs: 120,
            ready_timeout_secs: 10,
            reply_max_lines: 40,
            reply_max_chars: 4000,
            log_file: "tui_output.log".to_string(),
            timeout_secs: 180,
        }
    }
}

/// External session listing and pinning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub pin_scope: PinScope,
    /// Pin store, relative to the audit directory
    pub bindings_file: String,
    /// External tool home; empty means `~/.claude`
    pub tool_home: String,
    pub default_limit: usize,
    pub default_active_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            pin_scope: PinScope::default(),
            bindings_file: "session_bindings.json".to_string(),
            tool_home: String::new(),
            default_limit: 10,
            default_active_minutes: 60,
        }
    }
}

/// Audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: "logs/audit".to_string(),
        }
    }
}

/// Diagnostic logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Rotated daily files kept
    pub retention_days: usize,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            level: "tether=info,tether_core=info,tether_tools=info".to_string(),
            retention_days: 30,
            json: false,
        }
    }
}
