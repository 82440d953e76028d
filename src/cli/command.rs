//! Operator requests and their dispatch to the engine
//!
//! Shared by the one-shot subcommands and the console.

use std::path::PathBuf;
use std::time::Duration;
use tether_core::Engine;
use tether_tools::{ExecutionRequest, ExecutionResult, ExitStatus, OperatorId, SessionId};

/// One operator request, already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Run {
        session: Option<String>,
        continue_latest: bool,
        command: String,
    },
    Sessions {
        limit: Option<usize>,
        minutes: Option<u64>,
    },
    SessionSet(String),
    SessionReset,
    TuiStart,
    TuiSend(String),
    TuiCapture(Option<usize>),
    TuiStop,
    Pull(String),
    Push {
        file: PathBuf,
        name: Option<String>,
    },
    Help,
}

/// Defaults applied when a request leaves them out.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub exec_timeout: Duration,
    pub tui_timeout: Duration,
    pub list_limit: usize,
    pub list_minutes: u64,
}

/// Text shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ok: bool,
    pub text: String,
}

impl Reply {
    fn from_result(result: &ExecutionResult) -> Self {
        Self {
            ok: result.is_success(),
            text: render(result),
        }
    }

    fn rejected(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }
}

pub const HELP: &str = "\
/run [--session ID | --continue] COMMAND
/sessions [n] [minutes]
/session set ID | /session reset
/tui-start | /tui TEXT | /tui-capture [n] | /tui-stop
/pull PATH
/push LOCAL_FILE [NAME]";

/// Execute `request` on behalf of `operator`.
pub async fn execute(
    engine: &Engine,
    operator: &OperatorId,
    request: Request,
    limits: &Limits,
) -> Reply {
    match request {
        Request::Run {
            session,
            continue_latest,
            command,
        } => {
            let mut req = ExecutionRequest::new(operator.clone(), command, limits.exec_timeout);
            if let Some(raw) = session {
                let Some(id) = SessionId::parse(&raw) else {
                    return Reply::rejected(format!("invalid session id: {}", raw));
                };
                req = req.with_session(id);
            }
            if continue_latest {
                req = req.with_continue();
            }
            Reply::from_result(&engine.run(req).await)
        }
        Request::Sessions { limit, minutes } => {
            let result = engine
                .list_sessions(
                    operator,
                    limit.unwrap_or(limits.list_limit),
                    minutes.unwrap_or(limits.list_minutes),
                )
                .await;
            Reply::from_result(&result)
        }
        Request::SessionSet(id) => Reply::from_result(&engine.pin_session(operator, &id).await),
        Request::SessionReset => Reply::from_result(&engine.unpin_session(operator).await),
        Request::TuiStart => {
            Reply::from_result(&engine.tui_start(operator, limits.tui_timeout).await.result)
        }
        Request::TuiSend(text) => Reply::from_result(
            &engine
                .tui_send(operator, &text, limits.tui_timeout)
                .await
                .result,
        ),
        Request::TuiCapture(lines) => Reply::from_result(
            &engine
                .tui_capture(operator, lines, limits.tui_timeout)
                .await
                .result,
        ),
        Request::TuiStop => {
            Reply::from_result(&engine.tui_stop(operator, limits.tui_timeout).await.result)
        }
        Request::Pull(path) => Reply::from_result(&engine.pull(operator, &path).await.result),
        Request::Push { file, name } => {
            let name =
                name.or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()));
            let Some(name) = name else {
                return Reply::rejected(format!("no file name in {}", file.display()));
            };
            let bytes = match tokio::fs::read(&file).await {
                Ok(bytes) => bytes,
                Err(e) => return Reply::rejected(format!("cannot read {}: {}", file.display(), e)),
            };
            Reply::from_result(&engine.push(operator, &name, &bytes).await)
        }
        Request::Help => Reply {
            ok: true,
            text: HELP.to_string(),
        },
    }
}

/// Operator-facing rendering of a result.
pub fn render(result: &ExecutionResult) -> String {
    let tail = result.stdout_tail.trim_end();
    match &result.exit_status {
        ExitStatus::Success if tail.is_empty() => "(no output)".to_string(),
        ExitStatus::Success => tail.to_string(),
        ExitStatus::NonZeroExit { code } => format!("exit code {}\n{}", code, tail)
            .trim_end()
            .to_string(),
        ExitStatus::TimedOut => format!(
            "timed out after {:.1}s\n{}",
            result.duration.as_secs_f64(),
            tail
        )
        .trim_end()
        .to_string(),
        ExitStatus::Denied { reason } => format!("denied: {}", reason),
        ExitStatus::InternalError { .. } => format!("error: {}", tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_tools::{DenyReason, InternalKind};

    #[test]
    fn test_render_success() {
        let ok = ExecutionResult::success("done\n", Duration::ZERO);
        assert_eq!(render(&ok), "done");
        let empty = ExecutionResult::success("", Duration::ZERO);
        assert_eq!(render(&empty), "(no output)");
    }

    #[test]
    fn test_render_failures() {
        let exit = ExecutionResult {
            exit_status: ExitStatus::NonZeroExit { code: 2 },
            stdout_tail: "bad flag\n".to_string(),
            duration: Duration::ZERO,
        };
        assert_eq!(render(&exit), "exit code 2\nbad flag");

        let timeout = ExecutionResult::timed_out("", Duration::from_millis(1500));
        assert_eq!(render(&timeout), "timed out after 1.5s");

        let denied = ExecutionResult::denied(DenyReason::NotWhitelisted, Duration::ZERO);
        assert_eq!(render(&denied), "denied: not_whitelisted");

        let internal = ExecutionResult::internal(InternalKind::Spawn, Duration::ZERO);
        assert_eq!(
            render(&internal),
            format!("error: {}", InternalKind::Spawn.user_message())
        );
    }
}
