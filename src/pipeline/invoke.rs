//! Subprocess invocation: run one poppler tool under a time budget.
//!
//! ## Lifecycle
//!
//! 1. Spawn with stdin closed and stdout/stderr piped. A spawn failure of
//!    kind `NotFound`/`PermissionDenied` means the binary is unusable and maps
//!    to [`ConvertError::ToolUnavailable`].
//! 2. Drain stdout and stderr on their own tasks while waiting for exit, so a
//!    chatty tool can never block on a full pipe.
//! 3. Wait for exit and for both pipes to close under one
//!    `tokio::time::timeout`. The tool runs in its own process group; on
//!    expiry the whole group gets SIGKILL and the direct child is reaped
//!    (`Child::kill` awaits the exit status) before [`ConvertError::Timeout`]
//!    is returned, so neither the tool nor anything it forked outlives the call.
//!
//! `kill_on_drop` covers the remaining path: if the calling future is dropped
//! mid-wait the child is still sent SIGKILL.

use crate::error::ConvertError;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest stderr excerpt kept in a diagnostic.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// A fully described tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Short tool name used in diagnostics, e.g. `pdftotext`.
    pub tool: &'static str,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(tool: &'static str, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_os_string())
    }
}

/// Everything a finished tool run produced.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Human-readable reason for a failed run, built from stderr and exit status.
    pub fn diagnostic(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            return match self.status.code() {
                Some(c) => format!("exited with status {c} and no diagnostic output"),
                None => "terminated by signal".to_string(),
            };
        }
        if stderr.chars().count() > MAX_DIAGNOSTIC_CHARS {
            let cut: String = stderr.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
            format!("{cut}\u{2026}")
        } else {
            stderr.to_string()
        }
    }
}

/// Run `cmd` to completion or until its timeout expires.
///
/// A non-zero exit status is **not** an error here: it is returned in
/// [`ToolOutput`] for the caller to interpret. Errors are reserved for the
/// host side: unusable binary, timeout, I/O failure.
///
/// The budget covers both the exit and the draining of stdout/stderr, so a
/// background process that inherited the pipes cannot stretch the call.
pub async fn run_tool(cmd: &ToolCommand) -> Result<ToolOutput, ConvertError> {
    debug!(
        "Running {} {:?} (timeout {}s)",
        cmd.program.display(),
        cmd.args,
        cmd.timeout.as_secs()
    );
    let start = Instant::now();

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a timeout can take down anything the tool forked.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| spawn_error(cmd, e))?;
    let pid = child.id();

    let mut stdout_task = child.stdout.take().map(drain);
    let mut stderr_task = child.stderr.take().map(drain);

    let run = async {
        let status = child
            .wait()
            .await
            .map_err(|e| ConvertError::Internal(format!("Failed waiting for {}: {e}", cmd.tool)))?;
        let stdout = collect(stdout_task.as_mut(), cmd.tool).await?;
        let stderr = collect(stderr_task.as_mut(), cmd.tool).await?;
        Ok::<_, ConvertError>((status, stdout, stderr))
    };
    let outcome = tokio::time::timeout(cmd.timeout, run).await;

    let (status, stdout, stderr) = match outcome {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            terminate(&mut child, pid, cmd.tool).await;
            abort(stdout_task);
            abort(stderr_task);
            return Err(e);
        }
        Err(_) => {
            warn!(
                "{} exceeded {}s budget, killing process group {:?}",
                cmd.tool,
                cmd.timeout.as_secs(),
                pid
            );
            terminate(&mut child, pid, cmd.tool).await;
            abort(stdout_task);
            abort(stderr_task);
            return Err(ConvertError::Timeout {
                tool: cmd.tool.to_string(),
                secs: cmd.timeout.as_secs(),
            });
        }
    };
    let elapsed = start.elapsed();

    debug!(
        "{} exited with {} after {}ms ({} bytes stdout, {} bytes stderr)",
        cmd.tool,
        status,
        elapsed.as_millis(),
        stdout.len(),
        stderr.len()
    );

    Ok(ToolOutput {
        status,
        stdout,
        stderr,
        elapsed,
    })
}

/// SIGKILL the tool's process group, then kill and reap the direct child.
async fn terminate(child: &mut Child, pid: Option<u32>, tool: &str) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            // SAFETY: killpg takes no pointers; it only signals the group
            // created by `process_group(0)` at spawn.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                debug!(
                    "killpg({pgid}) for {tool}: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    // Fails harmlessly when the child was already reaped by `wait`.
    if let Err(e) = child.kill().await {
        debug!("kill {tool}: {e}");
    }
}

fn spawn_error(cmd: &ToolCommand, e: std::io::Error) -> ConvertError {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => ConvertError::ToolUnavailable {
            tool: cmd.tool.to_string(),
            path: cmd.program.clone(),
            reason: e.to_string(),
        },
        _ => ConvertError::Internal(format!("Failed to spawn {}: {e}", cmd.tool)),
    }
}

type Reader = JoinHandle<std::io::Result<Vec<u8>>>;

fn drain<R>(mut reader: R) -> Reader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

fn abort(task: Option<Reader>) {
    if let Some(t) = task {
        t.abort();
    }
}

/// Await a reader in place; the handle stays with the caller so it can be
/// aborted if the budget runs out first.
async fn collect(task: Option<&mut Reader>, tool: &str) -> Result<Vec<u8>, ConvertError> {
    match task {
        None => Ok(Vec::new()),
        Some(t) => t
            .await
            .map_err(|e| ConvertError::Internal(format!("{tool} output reader panicked: {e}")))?
            .map_err(|e| ConvertError::Internal(format!("Failed to read {tool} output: {e}"))),
    }
}
