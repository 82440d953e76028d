use super::config::InteractiveConfig;
use super::multiplexer::{BackingSpec, Multiplexer};
use super::state::SessionState;
use crate::error::Error;
use crate::output::{bound_reply, strip_ansi_escapes};
use crate::types::{DenyReason, ExecutionResult, InternalKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{timeout_at, Instant as TokioInstant};
use tracing::{debug, error, info, warn};

/// Poll interval while waiting for a new backing session
const READY_POLL: Duration = Duration::from_millis(100);

/// Outcome of an interactive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReply {
    /// Result reported to the caller
    pub result: ExecutionResult,
    /// The backing session was found missing and the manager reset to
    /// `Stopped` while handling this request
    pub session_reset: bool,
}

impl SessionReply {
    fn plain(result: ExecutionResult) -> Self {
        Self {
            result,
            session_reset: false,
        }
    }
}

struct Inner {
    state: SessionState,
    last_capture: Option<String>,
}

/// Owner of the single interactive session.
///
/// All four operations serialize on one fair mutex, so queued callers run in
/// submission order and each holds the backing session exclusively. A caller
/// whose deadline expires while queued gets `TimedOut` and never touches the
/// session. [`state`](Self::state) is readable without queueing.
pub struct InteractiveSessionManager {
    config: InteractiveConfig,
    workdir: PathBuf,
    mux: Arc<dyn Multiplexer>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl InteractiveSessionManager {
    /// Manager whose backing session starts in `workdir`.
    pub fn new(
        config: InteractiveConfig,
        workdir: impl Into<PathBuf>,
        mux: Arc<dyn Multiplexer>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Stopped);
        Self {
            config,
            workdir: workdir.into(),
            mux,
            inner: Mutex::new(Inner {
                state: SessionState::Stopped,
                last_capture: None,
            }),
            state_tx,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &InteractiveConfig {
        &self.config
    }

    /// Working directory of the backing session.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current state, without waiting for in-flight operations.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Create (or adopt) the backing session. Valid only from `Stopped`.
    pub async fn start(&self, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let deadline = TokioInstant::now() + timeout;
        let Some(mut inner) = self.acquire(deadline).await else {
            return queued_timeout(started);
        };
        if inner.state != SessionState::Stopped {
            return invalid_state(inner.state, started);
        }

        let name = self.config.session_name.as_str();
        self.set_state(&mut inner, SessionState::Starting);

        let alive = match timeout_at(deadline, self.mux.is_alive(name)).await {
            Ok(alive) => alive,
            Err(_) => return self.start_expired(&mut inner, started),
        };
        match alive {
            Ok(true) => {
                info!(session = %name, "Adopting existing backing session");
            }
            Ok(false) => {
                let spec = BackingSpec {
                    name: name.to_string(),
                    workdir: self.workdir.clone(),
                    command: self.config.command.clone(),
                    log_file: self.config.log_file.clone(),
                };
                match timeout_at(deadline, self.mux.create(&spec)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(session = %name, error = %e, "Failed to create backing session");
                        self.set_state(&mut inner, SessionState::Stopped);
                        return SessionReply::plain(ExecutionResult::internal(
                            InternalKind::from(&e),
                            started.elapsed(),
                        ));
                    }
                    Err(_) => return self.start_expired(&mut inner, started),
                }
            }
            Err(e) => {
                error!(session = %name, error = %e, "Failed to query backing session");
                self.set_state(&mut inner, SessionState::Stopped);
                return SessionReply::plain(ExecutionResult::internal(
                    InternalKind::from(&e),
                    started.elapsed(),
                ));
            }
        }

        let ready_deadline = deadline.min(TokioInstant::now() + self.config.ready_timeout);
        loop {
            match timeout_at(ready_deadline, self.mux.is_alive(name)).await {
                Ok(Ok(true)) => break,
                Ok(Ok(false)) | Err(_) => {}
                Ok(Err(e)) => warn!(session = %name, error = %e, "Readiness probe failed"),
            }
            let now = TokioInstant::now();
            if now >= ready_deadline {
                warn!(session = %name, "Backing session did not become ready");
                match timeout_at(deadline, self.mux.destroy(name)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "Cleanup of unready backing session failed"),
                    Err(_) => debug!("Cleanup of unready backing session timed out"),
                }
                self.set_state(&mut inner, SessionState::Stopped);
                let elapsed = started.elapsed();
                return SessionReply::plain(if now >= deadline {
                    ExecutionResult::timed_out("interactive session did not start in time", elapsed)
                } else {
                    ExecutionResult::internal(InternalKind::Multiplexer, elapsed)
                });
            }
            tokio::time::sleep_until((now + READY_POLL).min(ready_deadline)).await;
        }

        inner.last_capture = None;
        self.set_state(&mut inner, SessionState::Running);
        info!(session = %name, workdir = %self.workdir.display(), "Interactive session running");
        SessionReply::plain(ExecutionResult::success(
            format!("interactive session '{}' started", name),
            started.elapsed(),
        ))
    }

    /// Type `text` into the session and return the settled screen tail.
    pub async fn send(&self, text: &str, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let deadline = TokioInstant::now() + timeout;
        let Some(mut inner) = self.acquire(deadline).await else {
            return queued_timeout(started);
        };
        if inner.state != SessionState::Running {
            return invalid_state(inner.state, started);
        }

        let name = self.config.session_name.as_str();
        match timeout_at(deadline, self.mux.send_input(name, text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.fail(&mut inner, e, deadline, started).await,
            Err(_) => return self.abandon_wait(&mut inner, None, started),
        }
        debug!(session = %name, chars = text.chars().count(), "Input sent to interactive session");

        let sent_at = TokioInstant::now();
        let settle = self.config.settle_delay;
        let wait_until = sent_at + self.config.max_wait;

        if sent_at + settle > deadline {
            tokio::time::sleep_until(deadline).await;
            return self.abandon_wait(&mut inner, None, started);
        }
        tokio::time::sleep_until(sent_at + settle).await;

        let lines = self.config.capture_lines;
        let mut current = match timeout_at(deadline, self.mux.capture(name, lines)).await {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) => return self.fail(&mut inner, e, deadline, started).await,
            Err(_) => return self.abandon_wait(&mut inner, None, started),
        };
        loop {
            let next = TokioInstant::now() + settle;
            if next > wait_until {
                debug!(session = %name, "Output still changing at max wait");
                break;
            }
            if next > deadline {
                return self.abandon_wait(&mut inner, Some(current.as_str()), started);
            }
            tokio::time::sleep_until(next).await;
            let again = match timeout_at(deadline, self.mux.capture(name, lines)).await {
                Ok(Ok(capture)) => capture,
                Ok(Err(e)) => return self.fail(&mut inner, e, deadline, started).await,
                Err(_) => return self.abandon_wait(&mut inner, Some(current.as_str()), started),
            };
            if again == current {
                break;
            }
            current = again;
        }

        let reply = self.bound(&current, self.config.reply_max_lines);
        inner.last_capture = Some(reply.clone());
        SessionReply::plain(ExecutionResult::success(reply, started.elapsed()))
    }

    /// Read-only tail of the session; `lines` defaults to the reply bound.
    pub async fn capture(&self, lines: Option<usize>, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let deadline = TokioInstant::now() + timeout;
        let Some(mut inner) = self.acquire(deadline).await else {
            return queued_timeout(started);
        };
        if inner.state != SessionState::Running {
            return invalid_state(inner.state, started);
        }

        let name = self.config.session_name.as_str();
        let lines = lines
            .unwrap_or(self.config.reply_max_lines)
            .clamp(1, self.config.capture_lines);
        let capture = match timeout_at(deadline, self.mux.capture(name, lines)).await {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) => return self.fail(&mut inner, e, deadline, started).await,
            Err(_) => return self.abandon_wait(&mut inner, None, started),
        };

        let reply = self.bound(&capture, lines.min(self.config.reply_max_lines));
        inner.last_capture = Some(reply.clone());
        SessionReply::plain(ExecutionResult::success(reply, started.elapsed()))
    }

    /// Destroy the backing session. A no-op success when already stopped.
    pub async fn stop(&self, timeout: Duration) -> SessionReply {
        let started = Instant::now();
        let deadline = TokioInstant::now() + timeout;
        let Some(mut inner) = self.acquire(deadline).await else {
            return queued_timeout(started);
        };
        if inner.state == SessionState::Stopped {
            return SessionReply::plain(ExecutionResult::success(
                "interactive session is not running",
                started.elapsed(),
            ));
        }

        let name = self.config.session_name.as_str();
        let Ok(outcome) = timeout_at(deadline, self.mux.destroy(name)).await else {
            // the backing session may still exist; a later stop retries
            warn!(session = %name, "Deadline expired stopping the backing session");
            return SessionReply::plain(ExecutionResult::timed_out(
                "interactive session did not stop in time",
                started.elapsed(),
            ));
        };
        inner.last_capture = None;
        self.set_state(&mut inner, SessionState::Stopped);
        match outcome {
            Ok(()) | Err(Error::SessionNotFound(_)) => {
                info!(session = %name, "Interactive session stopped");
                SessionReply::plain(ExecutionResult::success(
                    format!("interactive session '{}' stopped", name),
                    started.elapsed(),
                ))
            }
            Err(e) => {
                error!(session = %name, error = %e, "Failed to destroy backing session");
                SessionReply::plain(ExecutionResult::internal(
                    InternalKind::from(&e),
                    started.elapsed(),
                ))
            }
        }
    }

    async fn acquire(&self, deadline: TokioInstant) -> Option<MutexGuard<'_, Inner>> {
        match timeout_at(deadline, self.inner.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Deadline expired while queued for the interactive session");
                None
            }
        }
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        debug!(from = %inner.state, to = %state, "Interactive session transition");
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn bound(&self, capture: &str, max_lines: usize) -> String {
        bound_reply(
            &strip_ansi_escapes(capture),
            max_lines,
            self.config.reply_max_chars,
        )
    }

    /// Deadline hit while creating the backing session.
    fn start_expired(&self, inner: &mut Inner, started: Instant) -> SessionReply {
        warn!(session = %self.config.session_name, "Deadline expired starting the session");
        self.set_state(inner, SessionState::Stopped);
        SessionReply::plain(ExecutionResult::timed_out(
            "interactive session did not start in time",
            started.elapsed(),
        ))
    }

    /// Deadline hit while waiting on output. The session stays `Running`.
    fn abandon_wait(
        &self,
        inner: &mut Inner,
        capture: Option<&str>,
        started: Instant,
    ) -> SessionReply {
        warn!(session = %self.config.session_name, "Deadline expired waiting for session output");
        let text = match capture {
            Some(capture) => {
                let reply = self.bound(capture, self.config.reply_max_lines);
                inner.last_capture = Some(reply.clone());
                reply
            }
            None => "no output captured before the deadline".to_string(),
        };
        SessionReply::plain(ExecutionResult::timed_out(text, started.elapsed()))
    }

    /// Map a multiplexer failure. A missing backing session resets the state
    /// machine to `Stopped` and is flagged for auditing; nothing is retried.
    async fn fail(
        &self,
        inner: &mut Inner,
        err: Error,
        deadline: TokioInstant,
        started: Instant,
    ) -> SessionReply {
        let name = self.config.session_name.as_str();
        let lost = match &err {
            Error::SessionNotFound(_) => true,
            _ => matches!(
                timeout_at(deadline, self.mux.is_alive(name)).await,
                Ok(Ok(false))
            ),
        };
        if lost {
            warn!(session = %name, error = %err, "Backing session lost, resetting to stopped");
            inner.last_capture = None;
            self.set_state(inner, SessionState::Stopped);
            return SessionReply {
                result: ExecutionResult::internal(InternalKind::SessionLost, started.elapsed()),
                session_reset: true,
            };
        }
        error!(session = %name, error = %err, "Interactive session operation failed");
        SessionReply::plain(ExecutionResult::internal(
            InternalKind::from(&err),
            started.elapsed(),
        ))
    }
}

fn queued_timeout(started: Instant) -> SessionReply {
    SessionReply::plain(ExecutionResult::timed_out(
        "timed out waiting for the interactive session; nothing was sent",
        started.elapsed(),
    ))
}

fn invalid_state(state: SessionState, started: Instant) -> SessionReply {
    debug!(state = %state, "Interactive operation not valid in current state");
    SessionReply::plain(ExecutionResult::denied(
        DenyReason::InvalidState { state },
        started.elapsed(),
    ))
}
