//! Validator child process execution.
//!
//! The validator runs as its own process group with stdin closed and both
//! output pipes captured. Each stream keeps at most `capture_limit` bytes;
//! the rest is counted and discarded while the pipe keeps draining, so a
//! chatty validator can neither block on a full pipe nor grow memory.
//!
//! # Termination
//!
//! On timeout or shutdown the whole process group is killed and the child
//! reaped before returning. The group is also killed after a normal exit so
//! background processes left behind by a wrapper script do not outlive the
//! unit.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::platform::signal::ShutdownSignal;

/// How long to wait for the output pipes to close after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Program and leading arguments of the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorCommand {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl ValidatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ValidatorCommand {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Bounds applied to one invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvokeLimits {
    pub timeout: Duration,
    pub capture_limit: usize,
}

/// Bytes captured from one output stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    dropped: u64,
}

impl CapturedOutput {
    pub(crate) fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        let keep = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += (chunk.len() - keep) as u64;
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes that were discarded past the capture limit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// How the child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Unknown
    }
}

/// A validator run that completed on its own.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub exit: ExitKind,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed: Duration,
}

/// Reasons an invocation did not produce a verdict.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to launch validator {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("validator exceeded {timeout_ms}ms and was terminated")]
    Timeout {
        timeout_ms: u64,
        stdout: CapturedOutput,
        stderr: CapturedOutput,
    },
    #[error("validator terminated by worker shutdown")]
    Cancelled,
    #[error("failed waiting for validator: {0}")]
    Wait(#[source] std::io::Error),
}

enum Completion {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run the validator with `paths` appended, in order, after its leading
/// arguments.
pub async fn run_validator(
    command: &ValidatorCommand,
    paths: &[PathBuf],
    limits: InvokeLimits,
    shutdown: &mut ShutdownSignal,
) -> Result<Invocation, InvokeError> {
    let start = Instant::now();

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.leading_args)
        .args(paths)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| InvokeError::Launch {
        program: command.program.clone(),
        source,
    })?;
    let pid = child.id();

    tracing::debug!(pid = ?pid, program = %command.program.display(), "validator started");

    let stdout = tokio::spawn(capture(child.stdout.take(), limits.capture_limit));
    let stderr = tokio::spawn(capture(child.stderr.take(), limits.capture_limit));

    let completion = tokio::select! {
        status = child.wait() => Completion::Exited(status),
        _ = tokio::time::sleep(limits.timeout) => Completion::TimedOut,
        _ = shutdown.triggered() => Completion::Cancelled,
    };

    match completion {
        Completion::Exited(status) => {
            kill_group(pid);
            let status = status.map_err(InvokeError::Wait)?;
            let (stdout, stderr) = (drain(stdout).await, drain(stderr).await);
            Ok(Invocation {
                exit: ExitKind::from(status),
                stdout,
                stderr,
                elapsed: start.elapsed(),
            })
        }
        Completion::TimedOut => {
            terminate(&mut child, pid).await;
            tracing::warn!(pid = ?pid, timeout_ms = limits.timeout.as_millis() as u64, "validator timed out");
            let (stdout, stderr) = (drain(stdout).await, drain(stderr).await);
            Err(InvokeError::Timeout {
                timeout_ms: limits.timeout.as_millis() as u64,
                stdout,
                stderr,
            })
        }
        Completion::Cancelled => {
            terminate(&mut child, pid).await;
            stdout.abort();
            stderr.abort();
            Err(InvokeError::Cancelled)
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> CapturedOutput {
    let mut captured = CapturedOutput::default();
    let Some(mut reader) = reader else {
        return captured;
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => captured.push(&buf[..n], limit),
            Err(e) => {
                tracing::debug!(error = %e, "validator output read failed");
                break;
            }
        }
    }
    captured
}

async fn drain(handle: JoinHandle<CapturedOutput>) -> CapturedOutput {
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "output capture task failed");
            CapturedOutput::default()
        }
        Err(_) => {
            abort.abort();
            tracing::debug!("validator output pipe still open after exit");
            CapturedOutput::default()
        }
    }
}

/// Kill the process group and reap the child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "validator already gone");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "failed to reap validator");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // SAFETY: killpg only sends a signal; the group id is the child's pid,
    // which cannot be reused while the group has members.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        tracing::trace!(pid, "process group already empty");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// True if `path` names something that could be executed directly.
pub fn looks_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
