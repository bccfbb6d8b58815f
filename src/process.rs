//! process
//!
//! Subprocess harness for every external command the pipeline spawns
//! (git, linters, test runs, the user's entrypoint, formatters).
//!
//! # Hygiene rules
//!
//! - Command strings are tokenized with shell-aware quoting semantics
//!   (`shlex`), so a path containing spaces survives as one argument.
//!   Naive whitespace splitting is forbidden.
//! - Children are spawned in a fresh process group so timeouts and
//!   cancellation can signal the whole tree.
//! - stdout and stderr are drained continuously by two reader tasks with
//!   a bounded in-memory capture, so a chatty child can never deadlock
//!   on a full pipe. The full stream is still appended to the log sink.
//! - On timeout the group receives SIGTERM, then SIGKILL after a
//!   5-second grace period.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Largest per-stream capture retained in memory.
const CAPTURE_CAP: usize = 64 * 1024;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Errors from subprocess execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command string was empty or had unbalanced quoting.
    #[error("unparseable command: {0:?}")]
    Unparseable(String),

    /// The binary could not be spawned.
    #[error("failed to spawn {program}: {message}")]
    SpawnFailed {
        program: String,
        message: String,
    },

    /// The call exceeded its timeout and was killed.
    #[error("command timed out after {timeout_secs}s: {command}")]
    Timeout {
        command: String,
        timeout_secs: u64,
        /// Output captured before the kill.
        output: ExecOutput,
    },

    /// I/O error while driving the child.
    #[error("subprocess i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tokenized command ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Tokenize a command string with shell quoting semantics.
    ///
    /// `python 'my script.py'` yields exactly two tokens: `python` and
    /// `my script.py`.
    pub fn parse(line: &str) -> Result<Self, ExecError> {
        let tokens = shlex::split(line).ok_or_else(|| ExecError::Unparseable(line.to_string()))?;
        let mut iter = tokens.into_iter();
        let program = iter
            .next()
            .ok_or_else(|| ExecError::Unparseable(line.to_string()))?;
        Ok(Self {
            program,
            args: iter.collect(),
        })
    }

    /// Display form for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Options for one subprocess invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Working directory for the child.
    pub cwd: PathBuf,
    /// Extra environment entries layered over the process environment.
    pub env: HashMap<String, String>,
    /// Wall-clock budget for the call.
    pub timeout: Duration,
    /// Log sink the full output streams are appended to.
    pub log_file: Option<PathBuf>,
}

impl ExecOptions {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout,
            log_file: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Result of a completed (non-timed-out) subprocess.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code; -1 when terminated by signal.
    pub code: i32,
    /// Bounded stdout capture, lossily decoded.
    pub stdout: String,
    /// Bounded stderr capture, lossily decoded.
    pub stderr: String,
    pub elapsed: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Build the environment overlay for hub subprocesses: `.env` contents
/// plus the interpreter directory prepended to `PATH`.
pub fn hub_env(
    env_file: Option<&Path>,
    interpreter: Option<&Path>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    if let Some(path) = env_file {
        if let Ok(iter) = dotenvy::from_path_iter(path) {
            for (key, value) in iter.flatten() {
                env.insert(key, value);
            }
        }
    }

    if let Some(interp) = interpreter {
        if let Some(dir) = interp.parent().filter(|d| !d.as_os_str().is_empty()) {
            let current = std::env::var("PATH").unwrap_or_default();
            env.insert(
                "PATH".to_string(),
                format!("{}:{}", dir.display(), current),
            );
        }
    }

    env
}

/// Run a command to completion under a timeout.
///
/// The child is placed in its own process group. Both output streams are
/// drained concurrently into bounded captures (and the log sink, when
/// configured). On timeout the group is signalled SIGTERM, then SIGKILL
/// after the grace period, and `ExecError::Timeout` carries whatever
/// output was captured.
pub async fn run_command(spec: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
    let started = Instant::now();
    debug!(command = %spec.display(), cwd = %opts.cwd.display(), "spawning");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&opts.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);
    for (key, value) in &opts.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| ExecError::SpawnFailed {
        program: spec.program.clone(),
        message: e.to_string(),
    })?;

    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let stdout_log = open_log(opts.log_file.as_deref()).await;
    let stderr_log = open_log(opts.log_file.as_deref()).await;
    let stdout_task = tokio::spawn(drain(stdout, stdout_log));
    let stderr_task = tokio::spawn(drain(stderr, stderr_log));

    let waited = tokio::time::timeout(opts.timeout, child.wait()).await;

    let status = match waited {
        Ok(status) => status?,
        Err(_) => {
            warn!(command = %spec.display(), "timeout, signalling process group");
            terminate_group(pgid, &mut child).await;

            let stdout = finish_capture(stdout_task).await;
            let stderr = finish_capture(stderr_task).await;
            return Err(ExecError::Timeout {
                command: spec.display(),
                timeout_secs: opts.timeout.as_secs(),
                output: ExecOutput {
                    code: -1,
                    stdout,
                    stderr,
                    elapsed: started.elapsed(),
                },
            });
        }
    };

    let stdout = finish_capture(stdout_task).await;
    let stderr = finish_capture(stderr_task).await;

    Ok(ExecOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

/// SIGTERM the group, give it the grace period, then SIGKILL.
async fn terminate_group(pgid: Option<Pid>, child: &mut tokio::process::Child) {
    if let Some(pgid) = pgid {
        let _ = killpg(pgid, Signal::SIGTERM);
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        if let Some(pgid) = pgid {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

async fn open_log(path: Option<&Path>) -> Option<tokio::fs::File> {
    let path = path?;
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .ok()
}

/// Drain a stream to completion, retaining at most `CAPTURE_CAP` bytes
/// in memory and appending everything to the log sink.
async fn drain(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    mut log: Option<tokio::fs::File>,
) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if captured.len() < CAPTURE_CAP {
                    let take = n.min(CAPTURE_CAP - captured.len());
                    captured.extend_from_slice(&buf[..take]);
                }
                if let Some(file) = log.as_mut() {
                    let _ = file.write_all(&buf[..n]).await;
                }
            }
        }
    }
    if let Some(mut file) = log {
        let _ = file.flush().await;
    }
    captured
}

async fn finish_capture(task: tokio::task::JoinHandle<Vec<u8>>) -> String {
    match task.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}
