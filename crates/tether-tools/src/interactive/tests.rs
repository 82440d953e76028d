use super::*;
use crate::error::{Error, Result};
use crate::output::TRUNCATION_MARKER;
use crate::types::{DenyReason, ExitStatus, InternalKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory multiplexer: each session's "screen" is the inputs typed so far.
#[derive(Default)]
struct FakeMux {
    sessions: Mutex<HashMap<String, Vec<String>>>,
    created: AtomicUsize,
    fail_create: bool,
    /// Delay before every create, send and destroy, like a wedged tmux server
    stall: Duration,
}

impl FakeMux {
    fn inputs(&self, name: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    async fn maybe_stall(&self) {
        if !self.stall.is_zero() {
            tokio::time::sleep(self.stall).await;
        }
    }

    fn kill_externally(&self, name: &str) {
        self.sessions.lock().unwrap().remove(name);
    }

    fn preexisting(name: &str) -> Self {
        let mux = Self::default();
        mux.sessions
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
        mux
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn create(&self, spec: &BackingSpec) -> Result<()> {
        self.maybe_stall().await;
        if self.fail_create {
            return Err(Error::Multiplexer("create refused".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .insert(spec.name.clone(), Vec::new());
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> Result<bool> {
        Ok(self.sessions.lock().unwrap().contains_key(name))
    }

    async fn send_input(&self, name: &str, text: &str) -> Result<()> {
        self.maybe_stall().await;
        let mut sessions = self.sessions.lock().unwrap();
        let screen = sessions
            .get_mut(name)
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))?;
        screen.push(text.to_string());
        Ok(())
    }

    async fn capture(&self, name: &str, _lines: usize) -> Result<String> {
        let sessions = self.sessions.lock().unwrap();
        let screen = sessions
            .get(name)
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))?;
        Ok(screen
            .iter()
            .map(|s| format!("> {}", s))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.maybe_stall().await;
        self.sessions
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::SessionNotFound(name.to_string()))
    }
}

const NAME: &str = "tether-test";
const T: Duration = Duration::from_secs(5);

fn fast_config() -> InteractiveConfig {
    InteractiveConfig {
        session_name: NAME.to_string(),
        command: "cat".to_string(),
        settle_delay: Duration::from_millis(10),
        max_wait: Duration::from_millis(300),
        ready_timeout: Duration::from_millis(300),
        ..InteractiveConfig::default()
    }
}

fn manager(mux: Arc<FakeMux>, config: InteractiveConfig) -> InteractiveSessionManager {
    InteractiveSessionManager::new(config, "/tmp", mux)
}

fn invalid(state: SessionState) -> ExitStatus {
    ExitStatus::Denied {
        reason: DenyReason::InvalidState { state },
    }
}

#[test]
fn test_config_validation() {
    assert!(InteractiveConfig::default().validate().is_ok());
    let bad_name = InteractiveConfig {
        session_name: "has:colon".to_string(),
        ..InteractiveConfig::default()
    };
    assert!(bad_name.validate().is_err());
    let tiny = InteractiveConfig {
        reply_max_chars: 3,
        ..InteractiveConfig::default()
    };
    assert!(tiny.validate().is_err());
}

#[tokio::test]
async fn test_send_before_start_is_invalid_state() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux.clone(), fast_config());

    let reply = mgr.send("hello", T).await;
    assert_eq!(reply.result.exit_status, invalid(SessionState::Stopped));
    assert_eq!(mux.created.load(Ordering::SeqCst), 0);
    assert!(mux.inputs(NAME).is_empty());
}

#[tokio::test]
async fn test_full_lifecycle() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux.clone(), fast_config());

    assert!(mgr.start(T).await.result.is_success());
    assert_eq!(mgr.state(), SessionState::Running);

    let reply = mgr.send("hello", T).await;
    assert!(reply.result.is_success());
    assert_eq!(reply.result.stdout_tail, "> hello");

    let captured = mgr.capture(None, T).await;
    assert!(captured.result.is_success());
    assert!(captured.result.stdout_tail.contains("hello"));

    assert!(mgr.stop(T).await.result.is_success());
    assert_eq!(mgr.state(), SessionState::Stopped);

    let reply = mgr.send("again", T).await;
    assert_eq!(reply.result.exit_status, invalid(SessionState::Stopped));
}

#[tokio::test]
async fn test_second_start_is_denied() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux.clone(), fast_config());

    assert!(mgr.start(T).await.result.is_success());
    let reply = mgr.start(T).await;
    assert_eq!(reply.result.exit_status, invalid(SessionState::Running));
    assert_eq!(mux.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_adopts_existing_backing_session() {
    let mux = Arc::new(FakeMux::preexisting(NAME));
    let mgr = manager(mux.clone(), fast_config());

    assert!(mgr.start(T).await.result.is_success());
    assert_eq!(mux.created.load(Ordering::SeqCst), 0);
    assert_eq!(mgr.state(), SessionState::Running);
}

#[tokio::test]
async fn test_failed_create_returns_to_stopped() {
    let mux = Arc::new(FakeMux {
        fail_create: true,
        ..FakeMux::default()
    });
    let mgr = manager(mux, fast_config());

    let reply = mgr.start(T).await;
    assert_eq!(
        reply.result.exit_status,
        ExitStatus::InternalError {
            kind: InternalKind::Multiplexer
        }
    );
    assert_eq!(mgr.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_stop_when_stopped_is_noop() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux, fast_config());
    assert!(mgr.stop(T).await.result.is_success());
    assert!(mgr.stop(T).await.result.is_success());
}

#[tokio::test]
async fn test_concurrent_sends_keep_submission_order() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux.clone(), fast_config());
    assert!(mgr.start(T).await.result.is_success());

    let texts: Vec<String> = (0..8).map(|i| format!("msg{}", i)).collect();
    let sends = texts.iter().map(|t| mgr.send(t, T));
    let replies = futures::future::join_all(sends).await;

    assert!(replies.iter().all(|r| r.result.is_success()));
    assert_eq!(mux.inputs(NAME), texts);
}

#[tokio::test]
async fn test_lost_backing_session_resets() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux.clone(), fast_config());
    assert!(mgr.start(T).await.result.is_success());

    mux.kill_externally(NAME);
    let reply = mgr.send("anyone there?", T).await;
    assert!(reply.session_reset);
    assert_eq!(
        reply.result.exit_status,
        ExitStatus::InternalError {
            kind: InternalKind::SessionLost
        }
    );
    assert_eq!(mgr.state(), SessionState::Stopped);

    // no silent retry: the next call sees the reset state
    let reply = mgr.capture(None, T).await;
    assert_eq!(reply.result.exit_status, invalid(SessionState::Stopped));
    assert!(!reply.session_reset);
}

#[tokio::test]
async fn test_queued_caller_times_out_without_sending() {
    let mux = Arc::new(FakeMux::default());
    let config = InteractiveConfig {
        settle_delay: Duration::from_millis(400),
        ..fast_config()
    };
    let mgr = Arc::new(manager(mux.clone(), config));
    assert!(mgr.start(T).await.result.is_success());

    let holder = {
        let mgr = mgr.clone();
        tokio::spawn(async move { mgr.send("first", T).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = mgr.send("second", Duration::from_millis(50)).await;
    assert_eq!(reply.result.exit_status, ExitStatus::TimedOut);

    assert!(holder.await.unwrap().result.is_success());
    assert_eq!(mux.inputs(NAME), vec!["first".to_string()]);
}

#[tokio::test]
async fn test_deadline_during_settle_keeps_running() {
    let mux = Arc::new(FakeMux::default());
    let config = InteractiveConfig {
        settle_delay: Duration::from_millis(500),
        ..fast_config()
    };
    let mgr = manager(mux.clone(), config);
    assert!(mgr.start(T).await.result.is_success());

    let reply = mgr.send("slow", Duration::from_millis(50)).await;
    assert_eq!(reply.result.exit_status, ExitStatus::TimedOut);
    assert_eq!(mgr.state(), SessionState::Running);
    assert_eq!(mux.inputs(NAME), vec!["slow".to_string()]);
}

#[tokio::test]
async fn test_reply_is_bounded() {
    let mux = Arc::new(FakeMux::default());
    let config = InteractiveConfig {
        reply_max_lines: 5,
        ..fast_config()
    };
    let mgr = manager(mux, config);
    assert!(mgr.start(T).await.result.is_success());

    let many: String = (0..100).map(|i| format!("row {}\n", i)).collect();
    let reply = mgr.send(&many, T).await;
    assert!(reply.result.stdout_tail.starts_with(TRUNCATION_MARKER));
    assert!(reply.result.stdout_tail.ends_with("row 99"));
    assert_eq!(reply.result.stdout_tail.lines().count(), 6);
}

#[tokio::test]
async fn test_state_watch_sees_transitions() {
    let mux = Arc::new(FakeMux::default());
    let mgr = manager(mux, fast_config());
    let rx = mgr.subscribe();
    assert_eq!(*rx.borrow(), SessionState::Stopped);

    mgr.start(T).await;
    assert_eq!(*rx.borrow(), SessionState::Running);
    mgr.stop(T).await;
    assert_eq!(*rx.borrow(), SessionState::Stopped);
}

#[tokio::test]
async fn test_stalled_send_respects_deadline() {
    let stalled = Arc::new(FakeMux {
        stall: Duration::from_secs(2),
        ..FakeMux::preexisting(NAME)
    });
    let mgr = manager(stalled, fast_config());
    assert!(mgr.start(T).await.result.is_success());

    let started = std::time::Instant::now();
    let reply = mgr.send("hi", Duration::from_millis(100)).await;
    assert_eq!(reply.result.exit_status, ExitStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(mgr.state(), SessionState::Running);
}

#[tokio::test]
async fn test_stalled_create_times_out_start() {
    let mux = Arc::new(FakeMux {
        stall: Duration::from_secs(2),
        ..FakeMux::default()
    });
    let mgr = manager(mux, fast_config());

    let started = std::time::Instant::now();
    let reply = mgr.start(Duration::from_millis(100)).await;
    assert_eq!(reply.result.exit_status, ExitStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(mgr.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_stalled_stop_times_out() {
    let mux = Arc::new(FakeMux {
        stall: Duration::from_secs(2),
        ..FakeMux::preexisting(NAME)
    });
    let mgr = manager(mux, fast_config());
    assert!(mgr.start(T).await.result.is_success());

    let started = std::time::Instant::now();
    let reply = mgr.stop(Duration::from_millis(100)).await;
    assert_eq!(reply.result.exit_status, ExitStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(1));
}
