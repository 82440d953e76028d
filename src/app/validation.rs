//! Configuration validation
//!
//! Turns the raw [`AppConfig`] into immutable runtime [`Settings`]. Any
//! malformed field rejects startup.

use super::config::{AppConfig, PolicyConfig};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_tools::{ExecConfig, InteractiveConfig, OperatorId, PinScope, Policy};
use tracing::warn;

/// Validated runtime settings
#[derive(Debug)]
pub struct Settings {
    pub policy: Policy,
    pub exec: ExecConfig,
    pub interactive: InteractiveConfig,
    pub interactive_timeout: Duration,
    pub tmux_binary: String,
    pub pin_scope: PinScope,
    pub bindings_path: PathBuf,
    pub tool_home: Option<PathBuf>,
    pub list_limit: usize,
    pub list_active_minutes: u64,
    pub audit_dir: PathBuf,
}

impl Settings {
    /// Validate `config`, creating the workspace and audit directories.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let home = dirs::home_dir();
        let policy = build_policy(&config.policy, home.as_deref())?;

        let exec = &config.exec;
        if exec.timeout_secs == 0 {
            bail!("exec.timeout_secs must be > 0");
        }
        let exec = ExecConfig {
            program: exec.program.clone(),
            prompt_args: exec.prompt_args.clone(),
            session_args: exec.session_args.clone(),
            continue_args: exec.continue_args.clone(),
            default_timeout: Duration::from_secs(exec.timeout_secs),
            kill_grace: Duration::from_millis(exec.kill_grace_ms),
            max_output_chars: exec.max_output_chars,
            strip_env: exec.strip_env.clone(),
        };
        exec.validate().context("Invalid [exec] configuration")?;

        let audit_dir = expand_home(&config.audit.dir, home.as_deref());
        if audit_dir.as_os_str().is_empty() {
            bail!("audit.dir must not be empty");
        }
        std::fs::create_dir_all(&audit_dir)
            .with_context(|| format!("Failed to create audit dir {}", audit_dir.display()))?;

        let tui = &config.interactive;
        if tui.timeout_secs == 0 || tui.max_wait_secs == 0 || tui.ready_timeout_secs == 0 {
            bail!("interactive timeouts must be > 0");
        }
        let interactive = InteractiveConfig {
            session_name: tui.session_name.clone(),
            command: tui.command.clone(),
            capture_lines: tui.capture_lines,
            settle_delay: Duration::from_millis(tui.settle_delay_ms),
            max_wait: Duration::from_secs(tui.max_wait_secs),
            ready_timeout: Duration::from_secs(tui.ready_timeout_secs),
            reply_max_lines: tui.reply_max_lines,
            reply_max_chars: tui.reply_max_chars,
            log_file: non_empty(&tui.log_file).map(|f| audit_dir.join(f)),
        };
        interactive
            .validate()
            .context("Invalid [interactive] configuration")?;
        if tui.tmux_binary.trim().is_empty() {
            bail!("interactive.tmux_binary must not be empty");
        }

        let sessions = &config.sessions;
        let Some(bindings) = non_empty(&sessions.bindings_file) else {
            bail!("sessions.bindings_file must not be empty");
        };
        if sessions.default_limit == 0 || sessions.default_active_minutes == 0 {
            bail!("sessions.default_limit and default_active_minutes must be > 0");
        }

        Ok(Self {
            policy,
            exec,
            interactive,
            interactive_timeout: Duration::from_secs(tui.timeout_secs),
            tmux_binary: tui.tmux_binary.trim().to_string(),
            pin_scope: sessions.pin_scope,
            bindings_path: audit_dir.join(bindings),
            tool_home: non_empty(&sessions.tool_home).map(|h| expand_home(h, home.as_deref())),
            list_limit: sessions.default_limit,
            list_active_minutes: sessions.default_active_minutes,
            audit_dir,
        })
    }
}

fn build_policy(config: &PolicyConfig, home: Option<&Path>) -> Result<Policy> {
    let Some(workspace) = non_empty(&config.workspace_dir) else {
        bail!("policy.workspace_dir must not be empty");
    };
    let workspace = expand_home(workspace, home);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    let mut operators = Vec::with_capacity(config.authorized_operators.len());
    for raw in &config.authorized_operators {
        let id = raw.trim();
        if id.is_empty() || id.contains(char::is_whitespace) {
            bail!("policy.authorized_operators contains an invalid id: {:?}", raw);
        }
        operators.push(OperatorId::new(id));
    }
    if operators.is_empty() {
        warn!("SECURITY WARNING: policy.authorized_operators is empty; every operator is allowed");
    }

    if config.blocked_commands.iter().any(|c| c.trim().is_empty()) {
        bail!("policy.blocked_commands contains an empty entry");
    }
    if config.blocked_paths.iter().any(|p| p.trim().is_empty()) {
        bail!("policy.blocked_paths contains an empty entry");
    }

    Ok(Policy::new(&workspace)
        .context("Invalid policy.workspace_dir")?
        .with_denylisted_commands(&config.blocked_commands)
        .context("Invalid policy.blocked_commands")?
        .with_denylisted_paths(&config.blocked_paths)
        .context("Invalid policy.blocked_paths")?
        .with_authorized_operators(operators))
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (r, Some(home)) if r.starts_with("~/") => home.join(&r[2..]),
        (r, _) => PathBuf::from(r),
    }
}
