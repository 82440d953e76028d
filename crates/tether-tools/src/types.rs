//! Request and result types shared by every execution path

use crate::interactive::SessionState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of a remote operator, as bound by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Wrap a transport-level identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for OperatorId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for OperatorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Conversation token surfaced by the external CLI tool. Opaque to us.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Maximum accepted length of a session id.
    pub const MAX_LEN: usize = 128;

    /// Wrap an id without validation (ids read back from the tool itself).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse an operator-supplied id.
    ///
    /// Accepts `[A-Za-z0-9_-]{1,128}` so the value can never smuggle extra
    /// arguments into the tool's command line.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= Self::MAX_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound instruction, consumed synchronously.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Who asked
    pub operator: OperatorId,
    /// Instruction text as received
    pub raw_command: String,
    /// Explicit session to continue, if any
    pub target_session: Option<SessionId>,
    /// Ask the tool to continue its most recent session
    pub continue_latest: bool,
    /// Deadline for the whole operation
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Create a request with no session binding.
    pub fn new(operator: OperatorId, raw_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operator,
            raw_command: raw_command.into(),
            target_session: None,
            continue_latest: false,
            timeout,
        }
    }

    /// Bind to an explicit session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.target_session = Some(session);
        self
    }

    /// Continue the tool's latest session.
    #[must_use]
    pub fn with_continue(mut self) -> Self {
        self.continue_latest = true;
        self
    }
}

/// Which component refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyOrigin {
    /// Access Control Gate
    Acl,
    /// Sandbox Validator
    Sandbox,
    /// Interactive session state machine
    Session,
    /// Request shape (missing file, bad filename, ...)
    Request,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    /// Operator is not on the whitelist
    NotWhitelisted,
    /// Command matched a denylisted pattern
    CommandDenylisted {
        /// The matching denylist entry
        pattern: String,
    },
    /// Path resolves outside the confinement root
    PathOutsideRoot,
    /// Path resolves under a denylisted prefix
    PathDenylisted {
        /// The matching prefix
        prefix: String,
    },
    /// Operation not valid in the session's current state
    InvalidState {
        /// State observed when the request was handled
        state: SessionState,
    },
    /// The request itself is unusable
    InvalidRequest {
        /// Operator-facing explanation
        detail: String,
    },
}

impl DenyReason {
    /// The component responsible for the refusal.
    #[must_use]
    pub fn origin(&self) -> DenyOrigin {
        match self {
            Self::NotWhitelisted => DenyOrigin::Acl,
            Self::CommandDenylisted { .. } | Self::PathOutsideRoot | Self::PathDenylisted { .. } => {
                DenyOrigin::Sandbox
            }
            Self::InvalidState { .. } => DenyOrigin::Session,
            Self::InvalidRequest { .. } => DenyOrigin::Request,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWhitelisted => f.write_str("not_whitelisted"),
            Self::CommandDenylisted { pattern } => {
                write!(f, "command matches denylisted pattern '{}'", pattern)
            }
            Self::PathOutsideRoot => f.write_str("path is outside the workspace"),
            Self::PathDenylisted { prefix } => write!(f, "path is under restricted '{}'", prefix),
            Self::InvalidState { state } => write!(f, "interactive session is {}", state),
            Self::InvalidRequest { detail } => f.write_str(detail),
        }
    }
}

/// Class of internal failure. Details stay in the diagnostic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalKind {
    /// External program failed to start
    Spawn,
    /// Backing session vanished
    SessionLost,
    /// Multiplexer control failure
    Multiplexer,
    /// Filesystem or pipe failure
    Io,
}

impl InternalKind {
    /// Generic operator-facing message.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Spawn => "the external tool could not be started",
            Self::SessionLost => {
                "the interactive session is no longer running; start it again"
            }
            Self::Multiplexer => "the terminal multiplexer reported an error",
            Self::Io => "an internal I/O error occurred",
        }
    }
}

impl From<&crate::Error> for InternalKind {
    fn from(err: &crate::Error) -> Self {
        match err {
            crate::Error::Spawn { .. } => Self::Spawn,
            crate::Error::SessionNotFound(_) => Self::SessionLost,
            crate::Error::Multiplexer(_) => Self::Multiplexer,
            _ => Self::Io,
        }
    }
}

/// Terminal status of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exit code 0 / operation completed
    Success,
    /// Tool exited with a non-zero code
    NonZeroExit {
        /// Process exit code (-1 when killed by a signal)
        code: i32,
    },
    /// Deadline expired
    TimedOut,
    /// Refused before execution
    Denied {
        /// Why
        #[serde(flatten)]
        reason: DenyReason,
    },
    /// Something broke on our side
    InternalError {
        /// Failure class
        kind: InternalKind,
    },
}

impl ExitStatus {
    /// Short label used in audit records.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::TimedOut => "timed_out",
            Self::Denied { .. } => "denied",
            Self::InternalError { .. } => "internal_error",
        }
    }
}

/// Immutable outcome returned to the caller and written to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Terminal status
    pub exit_status: ExitStatus,
    /// Bounded tail of the captured output (or a status message)
    pub stdout_tail: String,
    /// Wall time spent
    pub duration: Duration,
}

impl ExecutionResult {
    /// Successful result with output.
    pub fn success(stdout_tail: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_status: ExitStatus::Success,
            stdout_tail: stdout_tail.into(),
            duration,
        }
    }

    /// Refusal; the message is the reason itself.
    #[must_use]
    pub fn denied(reason: DenyReason, duration: Duration) -> Self {
        Self {
            stdout_tail: reason.to_string(),
            exit_status: ExitStatus::Denied { reason },
            duration,
        }
    }

    /// Internal failure with a generic message.
    #[must_use]
    pub fn internal(kind: InternalKind, duration: Duration) -> Self {
        Self {
            stdout_tail: kind.user_message().to_string(),
            exit_status: ExitStatus::InternalError { kind },
            duration,
        }
    }

    /// Deadline expiry with whatever output was captured.
    pub fn timed_out(stdout_tail: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_status: ExitStatus::TimedOut,
            stdout_tail: stdout_tail.into(),
            duration,
        }
    }

    /// Whether the operation completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.exit_status, ExitStatus::Success)
    }

    /// Deny reason, if refused.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match &self.exit_status {
            ExitStatus::Denied { reason } => Some(reason),
            _ => None,
        }
    }
}
