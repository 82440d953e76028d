use super::config::{ExecConfig, COMMAND_PLACEHOLDER, SESSION_PLACEHOLDER};
use crate::error::Error;
use crate::output::TailBuffer;
use crate::types::{ExecutionRequest, ExecutionResult, ExitStatus, InternalKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 4096;

/// Output still buffered in the pipes after the tool exits is drained for at
/// most this long (background grandchildren may hold them open).
const DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// Runs single commands through the external CLI tool.
///
/// Every run gets its own child process group and its own deadline, so any
/// number of runs may be in flight at once.
#[derive(Debug, Clone)]
pub struct OneShotExecutor {
    config: ExecConfig,
    workdir: PathBuf,
}

enum Completion {
    Exited(std::process::ExitStatus),
    DeadlineExpired,
}

impl OneShotExecutor {
    /// Executor whose children run in `workdir` (the confinement root).
    pub fn new(config: ExecConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Working directory of every child.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Argument vector for `request`: session selection first, then the
    /// command. An explicit session takes precedence over `continue_latest`.
    #[must_use]
    pub fn build_args(&self, request: &ExecutionRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(session) = &request.target_session {
            args.extend(
                self.config
                    .session_args
                    .iter()
                    .map(|a| a.replace(SESSION_PLACEHOLDER, session.as_str())),
            );
        } else if request.continue_latest {
            args.extend(self.config.continue_args.iter().cloned());
        }
        args.extend(
            self.config
                .prompt_args
                .iter()
                .map(|a| a.replace(COMMAND_PLACEHOLDER, &request.raw_command)),
        );
        args
    }

    /// Run `request` to completion or deadline.
    ///
    /// Never fails: spawn and pipe errors become `InternalError` results and
    /// are logged here in full.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let start = Instant::now();
        let args = self.build_args(request);

        info!(
            operator = %request.operator,
            program = %self.config.program,
            session = ?request.target_session.as_ref().map(|s| s.as_str()),
            continue_latest = request.continue_latest,
            timeout_ms = request.timeout.as_millis() as u64,
            "Running one-shot command"
        );
        debug!(args = ?args, "One-shot arguments");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &self.config.strip_env {
            cmd.env_remove(var);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = Error::Spawn {
                    program: self.config.program.clone(),
                    source,
                };
                error!(error = %err, "Failed to start external tool");
                return ExecutionResult::internal(InternalKind::from(&err), start.elapsed());
            }
        };
        let pid = child.id();

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut buffer = TailBuffer::for_chars(self.config.max_output_chars);
        let deadline = tokio::time::Instant::now() + request.timeout;

        let completion = collect(&mut child, &mut stdout, &mut stderr, &mut buffer, deadline).await;

        let completion = match completion {
            Ok(completion) => completion,
            Err(err) => {
                error!(error = %err, "Lost contact with external tool");
                terminate(&mut child, pid, self.config.kill_grace).await;
                return ExecutionResult::internal(InternalKind::Io, start.elapsed());
            }
        };

        match completion {
            Completion::Exited(status) => {
                drain(&mut stdout, &mut stderr, &mut buffer, deadline).await;
                let output = buffer.finish(self.config.max_output_chars);
                let duration = start.elapsed();
                let exit_status = match status.code() {
                    Some(0) => ExitStatus::Success,
                    Some(code) => ExitStatus::NonZeroExit { code },
                    None => ExitStatus::NonZeroExit { code: -1 },
                };
                if let ExitStatus::NonZeroExit { code } = exit_status {
                    warn!(exit_code = code, "External tool exited with non-zero status");
                }
                info!(
                    exit_code = status.code().unwrap_or(-1),
                    duration_ms = duration.as_millis() as u64,
                    "One-shot command completed"
                );
                ExecutionResult {
                    exit_status,
                    stdout_tail: output,
                    duration,
                }
            }
            Completion::DeadlineExpired => {
                warn!(
                    timeout_ms = request.timeout.as_millis() as u64,
                    "One-shot command timed out, terminating process group"
                );
                terminate(&mut child, pid, self.config.kill_grace).await;
                let output = buffer.finish(self.config.max_output_chars);
                ExecutionResult::timed_out(output, start.elapsed())
            }
        }
    }
}

/// Read both pipes until the child exits or the deadline passes.
async fn collect<O, E>(
    child: &mut Child,
    stdout: &mut Option<O>,
    stderr: &mut Option<E>,
    buffer: &mut TailBuffer,
    deadline: tokio::time::Instant,
) -> std::io::Result<Completion>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            n = read_some(stdout, &mut out_buf) => match n {
                Ok(0) | Err(_) => *stdout = None,
                Ok(n) => buffer.push(&out_buf[..n]),
            },
            n = read_some(stderr, &mut err_buf) => match n {
                Ok(0) | Err(_) => *stderr = None,
                Ok(n) => buffer.push(&err_buf[..n]),
            },
            status = child.wait() => return status.map(Completion::Exited),
            _ = &mut sleep => return Ok(Completion::DeadlineExpired),
        }
    }
}

/// Pick up output written just before exit.
async fn drain<O, E>(
    stdout: &mut Option<O>,
    stderr: &mut Option<E>,
    buffer: &mut TailBuffer,
    deadline: tokio::time::Instant,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let limit = deadline.min(tokio::time::Instant::now() + DRAIN_WINDOW);
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let sleep = tokio::time::sleep_until(limit);
    tokio::pin!(sleep);

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_some(stdout, &mut out_buf) => match n {
                Ok(0) | Err(_) => *stdout = None,
                Ok(n) => buffer.push(&out_buf[..n]),
            },
            n = read_some(stderr, &mut err_buf) => match n {
                Ok(0) | Err(_) => *stderr = None,
                Ok(n) => buffer.push(&err_buf[..n]),
            },
            _ = &mut sleep => break,
        }
    }
}

/// Read from a pipe that may already be closed; a closed pipe never resolves.
async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

/// SIGTERM the child's process group, then SIGKILL after `grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        debug!("Grace period elapsed, forcing kill");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill external tool");
        }
    }
    // leftovers in the group (e.g. backgrounded grandchildren)
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pid, signal = ?signal, error = %e, "Failed to signal process group"),
    }
}
