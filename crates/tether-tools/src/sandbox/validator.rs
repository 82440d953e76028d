//! Command and path validation against the policy

use super::path::{clean_token, expand_tilde, looks_like_path, resolve_physical};
use super::{Policy, Verdict};
use crate::types::DenyReason;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Characters that start a new command segment.
const SEGMENT_SEPARATORS: &[char] = &['|', '&', ';', '\n', '`', '(', ')', '{', '}'];

/// Commands that run their argument as another command.
const COMMAND_WRAPPERS: &[&str] = &[
    "builtin", "command", "doas", "env", "exec", "nice", "nohup", "sudo", "time", "timeout",
    "xargs",
];

/// Shells whose `-c` argument is itself a command line.
const SHELLS: &[&str] = &["ash", "bash", "dash", "fish", "ksh", "sh", "zsh"];

/// Stateless validator. Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct SandboxValidator {
    policy: Arc<Policy>,
    home: Option<PathBuf>,
}

impl SandboxValidator {
    /// Validator using the current user's home directory for `~`.
    #[must_use]
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            policy,
            home: dirs::home_dir(),
        }
    }

    /// Override the directory `~` expands to.
    #[must_use]
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Policy this validator enforces.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Full check of a one-shot command: the command check, then every
    /// argument that names a path (anything containing `/` or starting
    /// with `~`).
    #[must_use]
    pub fn validate(&self, command: &str) -> Verdict {
        if let Verdict::Deny(reason) = self.check_command(command) {
            return Verdict::Deny(reason);
        }
        for token in command
            .split(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '='))
            .map(clean_token)
            .filter(|t| looks_like_path(t))
        {
            if let Verdict::Deny(reason) = self.check_path(token) {
                return Verdict::Deny(reason);
            }
        }
        Verdict::Allow
    }

    /// Denylist check on the command text alone.
    ///
    /// Entries containing whitespace match as a normalized substring anywhere.
    /// Single-word entries match the leading token of every segment, exactly
    /// or as a prefix (`python` also blocks `python3.12`).
    #[must_use]
    pub fn check_command(&self, command: &str) -> Verdict {
        let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");

        for entry in self.policy.denylisted_commands() {
            let hit = if entry.contains(' ') {
                normalized.contains(entry)
            } else {
                leading_commands(command)
                    .iter()
                    .any(|cmd| cmd.starts_with(entry))
            };
            if hit {
                warn!(pattern = %entry, "Denylisted command blocked");
                return Verdict::Deny(DenyReason::CommandDenylisted {
                    pattern: entry.to_string(),
                });
            }
        }
        Verdict::Allow
    }

    /// Path check for a single operator-supplied path.
    #[must_use]
    pub fn check_path(&self, raw: &str) -> Verdict {
        match self.resolve_path(raw) {
            Ok(_) => Verdict::Allow,
            Err(reason) => {
                warn!(path = %raw, reason = %reason, "Path blocked");
                Verdict::Deny(reason)
            }
        }
    }

    /// Resolve `raw` to its physical path, or the reason it is refused.
    ///
    /// Relative paths are taken against the confinement root and `~` against
    /// the home directory. Symlinks are resolved before any comparison.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, DenyReason> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DenyReason::InvalidRequest {
                detail: "empty path".to_string(),
            });
        }
        let root = self.policy.confinement_root();
        let expanded = expand_tilde(raw, self.home.as_deref());
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        };

        let resolved = resolve_physical(&absolute).ok_or(DenyReason::PathOutsideRoot)?;
        if !resolved.starts_with(root) {
            return Err(DenyReason::PathOutsideRoot);
        }
        if let Some(prefix) = self
            .policy
            .denylisted_path_prefixes()
            .iter()
            .find(|p| p.matches(&resolved))
        {
            return Err(DenyReason::PathDenylisted {
                prefix: prefix.display(),
            });
        }
        Ok(resolved)
    }
}

/// Base names of every command position in `command`.
///
/// Each segment contributes its first token after `NAME=value` assignments;
/// wrappers such as `sudo` or `env` also contribute the command they run, and
/// `sh -c SCRIPT` contributes the commands of the script.
fn leading_commands(command: &str) -> Vec<&str> {
    let mut found = Vec::new();
    for segment in command.split(SEGMENT_SEPARATORS) {
        segment_commands(segment, &mut found);
    }
    found
}

fn segment_commands<'a>(segment: &'a str, found: &mut Vec<&'a str>) {
    let mut rest = segment;
    let mut wrapped = false;
    while let Some((raw, after)) = next_word(rest) {
        rest = after;
        let token = raw.trim_matches(['"', '\'', '$', '<', '>']);
        if token.is_empty() || is_assignment(token) {
            continue;
        }
        if token.starts_with('-') && wrapped {
            // wrapper flag, e.g. `sudo -u root`
            continue;
        }
        let base = token.rsplit('/').next().unwrap_or(token);
        found.push(base);
        if SHELLS.contains(&base) {
            if let Some(script) = shell_script(rest) {
                segment_commands(script, found);
            }
            return;
        }
        if !COMMAND_WRAPPERS.contains(&base) {
            return;
        }
        wrapped = true;
    }
}

/// Script text following a `-c` style flag in a shell's arguments.
fn shell_script(args: &str) -> Option<&str> {
    let mut rest = args;
    while let Some((word, after)) = next_word(rest) {
        let flags = word.strip_prefix('-')?;
        if !flags.starts_with('-') && flags.contains('c') {
            return Some(after.trim().trim_matches(['"', '\'']));
        }
        rest = after;
    }
    None
}

/// First whitespace-delimited word of `s` and everything after it.
fn next_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some(s.split_at(end))
}

fn is_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}
