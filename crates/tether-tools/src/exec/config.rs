use crate::error::{Error, Result};
use crate::output::marker_len;
use std::time::Duration;

/// Placeholder replaced with the operator's command
pub const COMMAND_PLACEHOLDER: &str = "{command}";

/// Placeholder replaced with the target session id
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default bound on returned output, in characters
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 4000;

/// Proxy variables removed from the child environment by default
pub const DEFAULT_STRIPPED_ENV: &[&str] = &[
    "http_proxy",
    "https_proxy",
    "all_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
];

/// How the external CLI tool is invoked.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Program to spawn (looked up on `PATH`)
    pub program: String,
    /// Arguments carrying the command; must contain `{command}`
    pub prompt_args: Vec<String>,
    /// Arguments selecting a session; must contain `{session}`
    pub session_args: Vec<String>,
    /// Arguments asking the tool to continue its latest session
    pub continue_args: Vec<String>,
    /// Timeout used when the caller gives none
    pub default_timeout: Duration,
    /// Wait between the graceful signal and the forced kill
    pub kill_grace: Duration,
    /// Bound on `stdout_tail`, in characters
    pub max_output_chars: usize,
    /// Variables removed from the child environment
    pub strip_env: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            prompt_args: vec!["-p".to_string(), COMMAND_PLACEHOLDER.to_string()],
            session_args: vec!["--session-id".to_string(), SESSION_PLACEHOLDER.to_string()],
            continue_args: vec!["--continue".to_string()],
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            kill_grace: Duration::from_secs(2),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            strip_env: DEFAULT_STRIPPED_ENV.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl ExecConfig {
    /// Reject settings the executor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config("exec.program must not be empty".to_string()));
        }
        if !self.prompt_args.iter().any(|a| a.contains(COMMAND_PLACEHOLDER)) {
            return Err(Error::Config(format!(
                "exec.prompt_args must contain {}",
                COMMAND_PLACEHOLDER
            )));
        }
        if !self.session_args.iter().any(|a| a.contains(SESSION_PLACEHOLDER)) {
            return Err(Error::Config(format!(
                "exec.session_args must contain {}",
                SESSION_PLACEHOLDER
            )));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::Config("exec.timeout_secs must be > 0".to_string()));
        }
        if self.max_output_chars <= marker_len() {
            return Err(Error::Config(format!(
                "exec.max_output_chars must be > {}",
                marker_len()
            )));
        }
        Ok(())
    }
}
