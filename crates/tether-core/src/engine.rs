//! Engine - request pipeline
//!
//! Every entry point follows the same order: Access Control Gate, then
//! Sandbox Validator (where the request carries a command or path), then the
//! executor or the interactive session, then exactly one audit record.
//! Outcomes are values; nothing here returns `Err` to the caller.

use crate::access::AccessGate;
use crate::audit::{AuditAction, AuditLog, AuditRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_tools::{
    DenyReason, ExecutionRequest, ExecutionResult, InteractiveSessionManager, InternalKind,
    OneShotExecutor, OperatorId, Policy, SandboxValidator, SessionReply, SessionRegistry, Verdict,
};
use tracing::{error, info, warn};

/// Result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// Outcome reported to the caller
    pub result: ExecutionResult,
    /// Resolved file to hand to the transport, when allowed
    pub path: Option<PathBuf>,
}

/// Main engine that coordinates gate, validator, backends and audit.
pub struct Engine {
    gate: AccessGate,
    validator: SandboxValidator,
    executor: OneShotExecutor,
    registry: Arc<SessionRegistry>,
    interactive: Arc<InteractiveSessionManager>,
    audit: Arc<AuditLog>,
}

impl Engine {
    /// Create an engine over one policy.
    #[must_use]
    pub fn new(
        policy: Arc<Policy>,
        executor: OneShotExecutor,
        registry: Arc<SessionRegistry>,
        interactive: Arc<InteractiveSessionManager>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            gate: AccessGate::new(policy.clone()),
            validator: SandboxValidator::new(policy),
            executor,
            registry,
            interactive,
            audit,
        }
    }

    /// Replace the validator (e.g. one with a different home directory).
    #[must_use]
    pub fn with_validator(mut self, validator: SandboxValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Access gate.
    #[must_use]
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Interactive session manager.
    #[must_use]
    pub fn interactive(&self) -> &InteractiveSessionManager {
        &self.interactive
    }

    /// Audit log.
    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Confinement root every operation is bound to.
    #[must_use]
    pub fn confinement_root(&self) -> &Path {
        self.validator.policy().confinement_root()
    }

    /// Audit the process start when the whitelist is empty.
    pub async fn record_startup(&self) {
        if !self.gate.is_open() {
            return;
        }
        let record = AuditRecord::new(OperatorId::new("system"), AuditAction::Startup, "")
            .with_detail("authorized operator set is empty; every operator is allowed");
        self.record(record).await;
    }

    /// One-shot run of the external tool.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let command = request.raw_command.clone();

        if let Err(reason) = self.admit_command(&request.operator, &command) {
            let result = ExecutionResult::denied(reason, started.elapsed());
            self.audit(&request.operator, AuditAction::Run, &command, &result, None)
                .await;
            return result;
        }

        let request = self.registry.apply_pin(request).await;
        let session = request
            .target_session
            .as_ref()
            .map(|s| format!("session={}", s))
            .or_else(|| request.continue_latest.then(|| "continue".to_string()));
        info!(
            operator = %request.operator,
            session = session.as_deref().unwrap_or("-"),
            "Running command"
        );

        let result = self.executor.execute(&request).await;
        self.audit(
            &request.operator,
            AuditAction::Run,
            &command,
            &result,
            session,
        )
        .await;
        result
    }

    /// Recent external sessions as display lines.
    pub async fn list_sessions(
        &self,
        operator: &OperatorId,
        limit: usize,
        active_minutes: u64,
    ) -> ExecutionResult {
        let started = Instant::now();
        let summary = format!("{} {}", limit, active_minutes);
        let result = match self.gate.authorize(operator) {
            Verdict::Deny(reason) => ExecutionResult::denied(reason, started.elapsed()),
            Verdict::Allow => match self.registry.list_recent(limit, active_minutes).await {
                Ok(sessions) if sessions.is_empty() => ExecutionResult::success(
                    format!("no sessions active in the last {} minutes", active_minutes),
                    started.elapsed(),
                ),
                Ok(sessions) => {
                    let lines: Vec<String> = sessions.iter().map(|s| s.display_line()).collect();
                    ExecutionResult::success(lines.join("\n"), started.elapsed())
                }
                Err(e) => {
                    error!(error = %e, "Failed to list sessions");
                    ExecutionResult::internal(InternalKind::from(&e), started.elapsed())
                }
            },
        };
        self.audit(operator, AuditAction::SessionsList, &summary, &result, None)
            .await;
        result
    }

    /// Pin a session for the operator's scope.
    pub async fn pin_session(&self, operator: &OperatorId, raw: &str) -> ExecutionResult {
        let started = Instant::now();
        let verdict = match self.gate.authorize(operator) {
            Verdict::Allow => self.registry.pin(operator, raw).await,
            deny => deny,
        };
        let result = match verdict {
            Verdict::Allow => ExecutionResult::success(
                format!("session pinned: {}", raw.trim()),
                started.elapsed(),
            ),
            Verdict::Deny(reason) => ExecutionResult::denied(reason, started.elapsed()),
        };
        self.audit(operator, AuditAction::SessionPin, raw, &result, None)
            .await;
        result
    }

    /// Clear the operator's pin.
    pub async fn unpin_session(&self, operator: &OperatorId) -> ExecutionResult {
        let started = Instant::now();
        let result = match self.gate.authorize(operator) {
            Verdict::Deny(reason) => ExecutionResult::denied(reason, started.elapsed()),
            Verdict::Allow => {
                let message = if self.registry.unpin(operator).await {
                    "session pin cleared"
                } else {
                    "no session was pinned"
                };
                ExecutionResult::success(message, started.elapsed())
            }
        };
        self.audit(operator, AuditAction::SessionUnpin, "", &result, None)
            .await;
        result
    }

    /// Start the interactive session.
    pub async fn tui_start(&self, operator: &OperatorId, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let reply = match self.gate.authorize(operator) {
            Verdict::Deny(reason) => denied_reply(reason, started),
            Verdict::Allow => self.interactive.start(timeout).await,
        };
        self.audit_reply(operator, AuditAction::TuiStart, "", &reply)
            .await;
        reply
    }

    /// Type `text` into the interactive session.
    pub async fn tui_send(
        &self,
        operator: &OperatorId,
        text: &str,
        timeout: Duration,
    ) -> SessionReply {
        let started = Instant::now();
        let reply = match self.admit_command(operator, text) {
            Err(reason) => denied_reply(reason, started),
            Ok(()) => self.interactive.send(text, timeout).await,
        };
        self.audit_reply(operator, AuditAction::TuiSend, text, &reply)
            .await;
        reply
    }

    /// Read the interactive session's tail.
    pub async fn tui_capture(
        &self,
        operator: &OperatorId,
        lines: Option<usize>,
        timeout: Duration,
    ) -> SessionReply {
        let started = Instant::now();
        let reply = match self.gate.authorize(operator) {
            Verdict::Deny(reason) => denied_reply(reason, started),
            Verdict::Allow => self.interactive.capture(lines, timeout).await,
        };
        let summary = lines.map(|n| n.to_string()).unwrap_or_default();
        self.audit_reply(operator, AuditAction::TuiCapture, &summary, &reply)
            .await;
        reply
    }

    /// Stop the interactive session.
    pub async fn tui_stop(&self, operator: &OperatorId, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let reply = match self.gate.authorize(operator) {
            Verdict::Deny(reason) => denied_reply(reason, started),
            Verdict::Allow => self.interactive.stop(timeout).await,
        };
        self.audit_reply(operator, AuditAction::TuiStop, "", &reply)
            .await;
        reply
    }

    /// Resolve a file the operator wants to download.
    pub async fn pull(&self, operator: &OperatorId, raw_path: &str) -> PullOutcome {
        let started = Instant::now();
        let (outcome, detail) = match self.admit_pull(operator, raw_path).await {
            Ok((path, size)) => {
                let detail = format!("resolved={}; size={} bytes", path.display(), size);
                let outcome = PullOutcome {
                    result: ExecutionResult::success(
                        format!("{} ({} bytes)", path.display(), size),
                        started.elapsed(),
                    ),
                    path: Some(path),
                };
                (outcome, Some(detail))
            }
            Err(result) => {
                let outcome = PullOutcome {
                    result: with_elapsed(result, started),
                    path: None,
                };
                (outcome, None)
            }
        };
        self.audit(operator, AuditAction::Pull, raw_path, &outcome.result, detail)
            .await;
        outcome
    }

    /// Write uploaded bytes to `confinement_root/filename`.
    pub async fn push(
        &self,
        operator: &OperatorId,
        filename: &str,
        bytes: &[u8],
    ) -> ExecutionResult {
        let started = Instant::now();
        let result = match self.admit_push(operator, filename) {
            Err(reason) => ExecutionResult::denied(reason, started.elapsed()),
            Ok(target) => match tokio::fs::write(&target, bytes).await {
                Ok(()) => {
                    info!(
                        operator = %operator,
                        path = %target.display(),
                        bytes = bytes.len(),
                        "File received"
                    );
                    ExecutionResult::success(
                        format!("saved {} ({} bytes)", filename, bytes.len()),
                        started.elapsed(),
                    )
                }
                Err(e) => {
                    error!(path = %target.display(), error = %e, "Failed to write uploaded file");
                    ExecutionResult::internal(InternalKind::Io, started.elapsed())
                }
            },
        };
        let detail = format!("{} bytes", bytes.len());
        self.audit(operator, AuditAction::Push, filename, &result, Some(detail))
            .await;
        result
    }

    /// Gate, then validator. Empty commands are refused.
    fn admit_command(&self, operator: &OperatorId, command: &str) -> Result<(), DenyReason> {
        self.gate.authorize(operator).into_result()?;
        if command.trim().is_empty() {
            return Err(DenyReason::InvalidRequest {
                detail: "command is empty".to_string(),
            });
        }
        self.validator.validate(command).into_result()
    }

    async fn admit_pull(
        &self,
        operator: &OperatorId,
        raw_path: &str,
    ) -> Result<(PathBuf, u64), ExecutionResult> {
        let deny = |reason| ExecutionResult::denied(reason, Duration::ZERO);
        self.gate.authorize(operator).into_result().map_err(deny)?;
        let path = self.validator.resolve_path(raw_path).map_err(deny)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(deny(invalid_request("file not found")));
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to stat requested file");
                return Err(ExecutionResult::internal(InternalKind::Io, Duration::ZERO));
            }
        };
        if !metadata.is_file() {
            return Err(deny(invalid_request("not a regular file")));
        }
        Ok((path, metadata.len()))
    }

    fn admit_push(&self, operator: &OperatorId, filename: &str) -> Result<PathBuf, DenyReason> {
        self.gate.authorize(operator).into_result()?;
        if !is_bare_filename(filename) {
            return Err(invalid_request("filename must not contain path separators"));
        }
        let target = self.confinement_root().join(filename);
        self.validator
            .check_path(&target.to_string_lossy())
            .into_result()?;
        Ok(target)
    }

    async fn audit(
        &self,
        operator: &OperatorId,
        action: AuditAction,
        command: &str,
        result: &ExecutionResult,
        detail: Option<String>,
    ) {
        let mut record = AuditRecord::new(operator.clone(), action, command).with_result(result);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        self.record(record).await;
    }

    async fn audit_reply(
        &self,
        operator: &OperatorId,
        action: AuditAction,
        command: &str,
        reply: &SessionReply,
    ) {
        self.audit(operator, action, command, &reply.result, None)
            .await;
        if reply.session_reset {
            warn!(operator = %operator, "Interactive session lost; reset to stopped");
            let record = AuditRecord::new(operator.clone(), AuditAction::SessionReset, "")
                .with_detail("backing session missing; state reset to stopped");
            self.record(record).await;
        }
    }

    async fn record(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record).await {
            error!(
                error = %e,
                action = ?record.action,
                operator = %record.operator,
                "Failed to write audit record"
            );
        }
    }
}

fn denied_reply(reason: DenyReason, started: Instant) -> SessionReply {
    SessionReply {
        result: ExecutionResult::denied(reason, started.elapsed()),
        session_reset: false,
    }
}

fn with_elapsed(mut result: ExecutionResult, started: Instant) -> ExecutionResult {
    result.duration = started.elapsed();
    result
}

fn invalid_request(detail: &str) -> DenyReason {
    DenyReason::InvalidRequest {
        detail: detail.to_string(),
    }
}

fn is_bare_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && name.trim() == name
}
