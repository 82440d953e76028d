//! End-to-end tests of the request pipeline with `/bin/sh` as the external
//! tool and an in-memory multiplexer.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tether_core::{AuditAction, AuditLog, AuditRecord, Decision, Engine};
use tether_tools::interactive::BackingSpec;
use tether_tools::{
    DenyOrigin, DenyReason, Error, ExecConfig, ExecutionRequest, ExitStatus, InteractiveConfig,
    InteractiveSessionManager, Multiplexer, OneShotExecutor, OperatorId, PinScope, Policy,
    SessionId, SessionRegistry, SessionSource, SessionState, SessionSummary,
};

const OWNER: i64 = 1001;
const T: Duration = Duration::from_secs(10);

struct FixedSource(Vec<SessionSummary>);

#[async_trait]
impl SessionSource for FixedSource {
    async fn recent_sessions(
        &self,
        _active_within: Duration,
    ) -> tether_tools::Result<Vec<SessionSummary>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct MemoryMux {
    sessions: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryMux {
    fn inputs(&self, name: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl Multiplexer for MemoryMux {
    async fn create(&self, spec: &BackingSpec) -> tether_tools::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(spec.name.clone(), Vec::new());
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> tether_tools::Result<bool> {
        Ok(self.sessions.lock().unwrap().contains_key(name))
    }

    async fn send_input(&self, name: &str, text: &str) -> tether_tools::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .get_mut(name)
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))?
            .push(text.to_string());
        Ok(())
    }

    async fn capture(&self, name: &str, _lines: usize) -> tether_tools::Result<String> {
        let sessions = self.sessions.lock().unwrap();
        let screen = sessions
            .get(name)
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))?;
        Ok(screen.join("\n"))
    }

    async fn destroy(&self, name: &str) -> tether_tools::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))
    }
}

struct Harness {
    _dir: TempDir,
    workspace: std::path::PathBuf,
    engine: Engine,
    mux: Arc<MemoryMux>,
}

impl Harness {
    async fn new(operators: &[i64]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let workspace = workspace.canonicalize().unwrap();

        let policy = Arc::new(
            Policy::new(&workspace)
                .unwrap()
                .with_denylisted_commands(["rm -rf", "sudo", "nc", "ncat"])
                .unwrap()
                .with_denylisted_paths(["/etc", "/private"])
                .unwrap()
                .with_authorized_operators(operators.iter().map(|o| OperatorId::from(*o))),
        );

        let exec_config = ExecConfig {
            program: "/bin/sh".to_string(),
            prompt_args: vec!["-c".to_string(), "{command}".to_string()],
            session_args: vec!["-c".to_string(), "echo pinned {session}".to_string()],
            continue_args: Vec::new(),
            kill_grace: Duration::from_millis(200),
            max_output_chars: 1000,
            ..ExecConfig::default()
        };
        let executor = OneShotExecutor::new(exec_config, &workspace);

        let source = FixedSource(vec![SessionSummary {
            id: SessionId::new("abc123"),
            title: "refactor the parser".to_string(),
            updated_at: Utc::now(),
        }]);
        let registry = Arc::new(SessionRegistry::new(Arc::new(source), PinScope::Operator));

        let mux = Arc::new(MemoryMux::default());
        let interactive_config = InteractiveConfig {
            session_name: "tether-it".to_string(),
            settle_delay: Duration::from_millis(10),
            max_wait: Duration::from_millis(200),
            ready_timeout: Duration::from_millis(200),
            ..InteractiveConfig::default()
        };
        let interactive = Arc::new(InteractiveSessionManager::new(
            interactive_config,
            &workspace,
            mux.clone(),
        ));

        let audit = Arc::new(AuditLog::open(dir.path().join("audit")).await.unwrap());
        let engine = Engine::new(policy, executor, registry, interactive, audit);

        Self {
            _dir: dir,
            workspace,
            engine,
            mux,
        }
    }

    async fn records(&self) -> Vec<AuditRecord> {
        self.engine
            .audit_log()
            .read_day(Utc::now().date_naive())
            .await
            .unwrap()
    }
}

fn owner() -> OperatorId {
    OperatorId::from(OWNER)
}

fn run(command: &str) -> ExecutionRequest {
    ExecutionRequest::new(owner(), command, T)
}

fn assert_file_absent(path: &Path) {
    assert!(!path.exists(), "{} should not exist", path.display());
}

#[tokio::test]
async fn test_denylisted_command_never_spawns() {
    let h = Harness::new(&[OWNER]).await;

    let result = h.engine.run(run("touch spawned.txt; rm -rf /")).await;
    assert_eq!(
        result.exit_status,
        ExitStatus::Denied {
            reason: DenyReason::CommandDenylisted {
                pattern: "rm -rf".to_string()
            }
        }
    );
    assert_file_absent(&h.workspace.join("spawned.txt"));

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, Decision::Deny);
    assert_eq!(records[0].denied_by, Some(DenyOrigin::Sandbox));
    assert_eq!(records[0].action, AuditAction::Run);
}

#[tokio::test]
async fn test_unknown_operator_denied_before_sandbox() {
    let h = Harness::new(&[OWNER]).await;
    let stranger = OperatorId::from(4242_i64);

    let result = h
        .engine
        .run(ExecutionRequest::new(stranger.clone(), "ls", T))
        .await;
    assert_eq!(result.deny_reason(), Some(&DenyReason::NotWhitelisted));

    // a command the sandbox would also refuse still reports the gate
    let result = h
        .engine
        .run(ExecutionRequest::new(stranger.clone(), "sudo ls", T))
        .await;
    assert_eq!(result.deny_reason(), Some(&DenyReason::NotWhitelisted));

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.denied_by == Some(DenyOrigin::Acl) && r.operator == stranger));
}

#[tokio::test]
async fn test_allowed_command_runs_in_workspace() {
    let h = Harness::new(&[OWNER]).await;

    let result = h.engine.run(run("pwd -P")).await;
    assert!(result.is_success());
    assert_eq!(result.stdout_tail.trim(), h.workspace.to_string_lossy());

    let result = h.engine.run(run("exit 4")).await;
    assert_eq!(result.exit_status, ExitStatus::NonZeroExit { code: 4 });

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].exit_code, Some(4));
    assert_eq!(records[1].outcome, "non_zero_exit");
}

#[tokio::test]
async fn test_path_argument_outside_workspace_denied() {
    let h = Harness::new(&[OWNER]).await;
    let result = h.engine.run(run("cat ../../outside.txt")).await;
    assert_eq!(result.deny_reason(), Some(&DenyReason::PathOutsideRoot));
}

#[tokio::test]
async fn test_empty_command_denied() {
    let h = Harness::new(&[OWNER]).await;
    let result = h.engine.run(run("   ")).await;
    assert!(matches!(
        result.deny_reason(),
        Some(DenyReason::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_mixed_runs_write_one_line_each() {
    let h = Arc::new(Harness::new(&[OWNER]).await);
    let stranger = OperatorId::from(4242_i64);

    // (operator, command, timeout, expected outcome) repeated three times
    let mix = [
        (owner(), "echo ok", T, "success"),
        (stranger.clone(), "echo ok", T, "denied"),
        (owner(), "sudo id", T, "denied"),
        (owner(), "sleep 30", Duration::from_millis(200), "timed_out"),
    ];
    let mut handles = Vec::new();
    for (operator, command, timeout, expected) in mix.iter().cycle().take(12).cloned() {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let result = h
                .engine
                .run(ExecutionRequest::new(operator, command, timeout))
                .await;
            assert_eq!(result.exit_status.label(), expected);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let date = Utc::now().date_naive();
    let raw = std::fs::read_to_string(h.engine.audit_log().file_for(date)).unwrap();
    let records: Vec<AuditRecord> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 12);
    assert!(records.iter().all(|r| r.action == AuditAction::Run));

    let count = |outcome: &str| records.iter().filter(|r| r.outcome == outcome).count();
    assert_eq!(count("success"), 3);
    assert_eq!(count("timed_out"), 3);
    assert_eq!(count("denied"), 6);
    let denied_by = |origin: DenyOrigin| {
        records
            .iter()
            .filter(|r| r.decision == Decision::Deny && r.denied_by == Some(origin))
            .count()
    };
    assert_eq!(denied_by(DenyOrigin::Acl), 3);
    assert_eq!(denied_by(DenyOrigin::Sandbox), 3);
}

#[tokio::test]
async fn test_timeout_is_audited() {
    let h = Harness::new(&[OWNER]).await;
    let result = h
        .engine
        .run(ExecutionRequest::new(owner(), "sleep 30", Duration::from_millis(300)))
        .await;
    assert_eq!(result.exit_status, ExitStatus::TimedOut);
    let records = h.records().await;
    assert_eq!(records[0].outcome, "timed_out");
}

#[tokio::test]
async fn test_pinned_session_is_applied() {
    let h = Harness::new(&[OWNER]).await;

    assert!(h.engine.pin_session(&owner(), "abc123").await.is_success());
    let result = h.engine.run(run("echo unpinned")).await;
    assert_eq!(result.stdout_tail, "pinned abc123\n");

    // explicit continue suppresses the pin
    let result = h.engine.run(run("echo latest").with_continue()).await;
    assert!(result.is_success());

    assert!(h.engine.unpin_session(&owner()).await.is_success());
    let result = h.engine.run(run("echo unpinned")).await;
    assert_eq!(result.stdout_tail, "unpinned\n");

    let records = h.records().await;
    let runs: Vec<_> = records
        .iter()
        .filter(|r| r.action == AuditAction::Run)
        .collect();
    assert_eq!(runs[0].detail.as_deref(), Some("session=abc123"));
    assert_eq!(runs[1].detail.as_deref(), Some("continue"));
    assert_eq!(runs[2].detail, None);
}

#[tokio::test]
async fn test_bad_pin_is_denied() {
    let h = Harness::new(&[OWNER]).await;
    let result = h.engine.pin_session(&owner(), "abc --yolo").await;
    assert!(matches!(
        result.deny_reason(),
        Some(DenyReason::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn test_list_sessions() {
    let h = Harness::new(&[OWNER]).await;
    let result = h.engine.list_sessions(&owner(), 5, 60).await;
    assert!(result.is_success());
    assert!(result
        .stdout_tail
        .starts_with("abc123 | refactor the parser | updated: "));

    let result = h
        .engine
        .list_sessions(&OperatorId::from("nobody"), 5, 60)
        .await;
    assert_eq!(result.deny_reason(), Some(&DenyReason::NotWhitelisted));
}

#[tokio::test]
async fn test_interactive_lifecycle() {
    let h = Harness::new(&[OWNER]).await;
    let op = owner();

    let reply = h.engine.tui_send(&op, "hello", T).await;
    assert_eq!(
        reply.result.exit_status,
        ExitStatus::Denied {
            reason: DenyReason::InvalidState {
                state: SessionState::Stopped
            }
        }
    );
    assert_eq!(h.mux.session_count(), 0);

    assert!(h.engine.tui_start(&op, T).await.result.is_success());
    let reply = h.engine.tui_send(&op, "hello", T).await;
    assert!(reply.result.is_success());
    assert_eq!(reply.result.stdout_tail, "hello");
    assert!(h
        .engine
        .tui_capture(&op, Some(10), T)
        .await
        .result
        .stdout_tail
        .contains("hello"));
    assert!(h.engine.tui_stop(&op, T).await.result.is_success());

    let reply = h.engine.tui_send(&op, "again", T).await;
    assert_eq!(
        reply.result.deny_reason(),
        Some(&DenyReason::InvalidState {
            state: SessionState::Stopped
        })
    );
    assert_eq!(h.mux.inputs("tether-it"), Vec::<String>::new());

    let actions: Vec<AuditAction> = h.records().await.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::TuiSend,
            AuditAction::TuiStart,
            AuditAction::TuiSend,
            AuditAction::TuiCapture,
            AuditAction::TuiStop,
            AuditAction::TuiSend,
        ]
    );
}

#[tokio::test]
async fn test_interactive_send_is_sandboxed() {
    let h = Harness::new(&[OWNER]).await;
    assert!(h.engine.tui_start(&owner(), T).await.result.is_success());

    let reply = h.engine.tui_send(&owner(), "sudo reboot", T).await;
    assert_eq!(
        reply.result.deny_reason(),
        Some(&DenyReason::CommandDenylisted {
            pattern: "sudo".to_string()
        })
    );
    assert!(h.mux.inputs("tether-it").is_empty());
}

#[tokio::test]
async fn test_lost_session_reset_is_audited() {
    let h = Harness::new(&[OWNER]).await;
    assert!(h.engine.tui_start(&owner(), T).await.result.is_success());
    h.mux.sessions.lock().unwrap().clear();

    let reply = h.engine.tui_capture(&owner(), None, T).await;
    assert!(reply.session_reset);
    assert_eq!(h.engine.interactive().state(), SessionState::Stopped);

    let records = h.records().await;
    let last = records.last().unwrap();
    assert_eq!(last.action, AuditAction::SessionReset);
}

#[tokio::test]
async fn test_open_whitelist_records_startup() {
    let h = Harness::new(&[]).await;
    assert!(h.engine.gate().is_open());
    h.engine.record_startup().await;

    let result = h
        .engine
        .run(ExecutionRequest::new(OperatorId::from("anyone"), "true", T))
        .await;
    assert!(result.is_success());

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, AuditAction::Startup);

    let closed = Harness::new(&[OWNER]).await;
    closed.engine.record_startup().await;
    assert!(closed.records().await.is_empty());
}

#[tokio::test]
async fn test_pull_and_push() {
    let h = Harness::new(&[OWNER]).await;
    std::fs::write(h.workspace.join("notes.txt"), "twelve bytes").unwrap();
    std::fs::create_dir(h.workspace.join("sub")).unwrap();

    let outcome = h.engine.pull(&owner(), "notes.txt").await;
    assert!(outcome.result.is_success());
    assert_eq!(outcome.path, Some(h.workspace.join("notes.txt")));

    let outcome = h.engine.pull(&owner(), "sub").await;
    assert!(outcome.path.is_none());
    assert!(matches!(
        outcome.result.deny_reason(),
        Some(DenyReason::InvalidRequest { .. })
    ));

    let outcome = h.engine.pull(&owner(), "/etc/passwd").await;
    assert!(outcome.path.is_none());
    assert_eq!(
        outcome.result.deny_reason(),
        Some(&DenyReason::PathOutsideRoot)
    );

    let result = h.engine.push(&owner(), "upload.bin", b"\x00\x01\x02").await;
    assert!(result.is_success());
    assert_eq!(
        std::fs::read(h.workspace.join("upload.bin")).unwrap(),
        vec![0, 1, 2]
    );

    let result = h.engine.push(&owner(), "../escape.bin", b"x").await;
    assert!(result.deny_reason().is_some());
    assert_file_absent(&h.workspace.parent().unwrap().join("escape.bin"));

    let records = h.records().await;
    let actions: Vec<AuditAction> = records.iter().map(|r| r.action).collect();
    assert_eq!(actions.len(), 5);
    assert_eq!(actions[4], AuditAction::Push);
    let pulled = records[0].detail.as_deref().unwrap();
    assert!(pulled.contains("notes.txt"));
    assert!(pulled.ends_with("size=12 bytes"));
}
