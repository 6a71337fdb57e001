//! [`ProcessHandle`] backed by a `tokio::process` child.
//!
//! A [`CommandHandle`] is built from a [`CommandSpec`] and spawns nothing
//! until [`ProcessHandle::start`] is called. When output capture is enabled,
//! stdout and stderr are drained by background reader tasks into shared
//! buffers. After the child exits the handle keeps reporting itself as
//! running until both readers hit EOF, but for at most [`OUTPUT_DRAIN_GRACE`]:
//! a background grandchild that inherited the pipes must not hold the pool
//! slot, so its readers are detached and whatever was captured so far stays.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handle::{ProcessHandle, ProcessStatus};

/// Description of a command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory; inherits the runner's when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Pipe and buffer stdout/stderr instead of inheriting them.
    pub capture_output: bool,
}

impl CommandSpec {
    /// Run `program` with no arguments and captured output.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            capture_output: true,
        }
    }

    /// Run `command_line` through `sh -c`.
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(command_line)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if self.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// How long output readers may keep a handle alive after its child exited.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A subprocess that is started on admission and polled for completion.
#[derive(Debug)]
pub struct CommandHandle {
    spec: CommandSpec,
    child: Option<Child>,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
}

impl CommandHandle {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            child: None,
            pid: None,
            exit_status: None,
            started_at: None,
            finished_at: None,
            stdout: OutputBuffer::default(),
            stderr: OutputBuffer::default(),
            readers: Vec::new(),
        }
    }

    pub const fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// OS process id, once started.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once the child has been observed exiting.
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Exit code; `None` while running or when killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    /// Whether the child exited successfully.
    pub fn success(&self) -> bool {
        self.exit_status.is_some_and(|status| status.success())
    }

    /// Wall time since start, frozen once the child exits.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        Some(
            self.finished_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started),
        )
    }

    /// Captured stdout so far (lossy UTF-8).
    pub fn stdout(&self) -> String {
        read_buffer(&self.stdout)
    }

    /// Captured stderr so far (lossy UTF-8).
    pub fn stderr(&self) -> String {
        read_buffer(&self.stderr)
    }

    /// Send SIGKILL (or the platform equivalent) to a started child.
    pub fn kill(&mut self) -> io::Result<()> {
        match self.child.as_mut() {
            Some(child) if self.exit_status.is_none() => child.start_kill(),
            _ => Ok(()),
        }
    }

    fn output_drained(&self) -> bool {
        self.readers.iter().all(JoinHandle::is_finished)
    }

    /// Whether output capture is over: both readers hit EOF, or the child
    /// exited more than [`OUTPUT_DRAIN_GRACE`] ago and the readers were
    /// detached.
    fn settle_output(&mut self) -> bool {
        if self.output_drained() {
            return true;
        }
        let since_exit = self
            .finished_at
            .map_or(Duration::ZERO, |at| at.elapsed());
        if since_exit < OUTPUT_DRAIN_GRACE {
            return false;
        }
        warn!(
            command = %self.spec,
            pid = ?self.pid,
            "Output pipes still open after exit, detaching readers"
        );
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        true
    }
}

impl ProcessHandle for CommandHandle {
    fn start(&mut self) -> io::Result<()> {
        if self.child.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("process already started: {}", self.spec),
            ));
        }

        let mut child = self.spec.to_command().spawn()?;
        self.pid = child.id();
        self.started_at = Some(Instant::now());
        debug!(command = %self.spec, pid = ?self.pid, "Spawned subprocess");

        if let Some(stdout) = child.stdout.take() {
            self.readers.push(drain(stdout, Arc::clone(&self.stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers.push(drain(stderr, Arc::clone(&self.stderr)));
        }
        self.child = Some(child);
        Ok(())
    }

    fn is_running(&mut self) -> io::Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        if self.exit_status.is_none() {
            match child.try_wait()? {
                Some(status) => {
                    debug!(command = %self.spec, pid = ?self.pid, %status, "Subprocess exited");
                    self.exit_status = Some(status);
                    self.finished_at = Some(Instant::now());
                }
                None => return Ok(true),
            }
        }
        Ok(!self.settle_output())
    }

    fn status(&self) -> ProcessStatus {
        match (&self.child, self.exit_status) {
            (None, _) => ProcessStatus::Ready,
            (Some(_), Some(_)) if self.output_drained() => ProcessStatus::Terminated,
            (Some(_), _) => ProcessStatus::Started,
        }
    }
}

fn drain<R>(mut reader: R, sink: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0_u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!(error = %e, "Failed to read subprocess output");
                    break;
                }
            }
        }
    })
}

fn read_buffer(buffer: &OutputBuffer) -> String {
    let bytes = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}
