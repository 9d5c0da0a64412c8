//! Runs an already-validated command under a deadline.
//!
//! The command runs as `<shell> -c <command>` in its own process group. stdout
//! and stderr are drained concurrently into one capped buffer. When the
//! deadline passes, or the caller drops the future, the whole group is killed.

use std::borrow::Cow;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::utils::guard::DropGuard;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(35);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_SHELL: &str = "bash";

/// How long readers may keep draining once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 8 * 1024;
#[cfg(target_os = "linux")]
const EXIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub shell: String,
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Outcome of one completed or timed-out run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    command: String,
    combined_output: Vec<u8>,
    exit_code: i32,
    timed_out: bool,
    truncated: bool,
    duration: Duration,
}

impl ExecutionResult {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// stdout and stderr interleaved in arrival order, as raw bytes.
    pub fn combined_output(&self) -> &[u8] {
        &self.combined_output
    }

    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.combined_output)
    }

    /// `-1` when the run timed out.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Output went past the configured cap and was cut.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Report<'a> {
            command: &'a str,
            output: Cow<'a, str>,
            exit_code: i32,
            timed_out: bool,
            truncated: bool,
            duration_ms: u128,
        }

        Report {
            command: &self.command,
            output: self.output_lossy(),
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            truncated: self.truncated,
            duration_ms: self.duration.as_millis(),
        }
        .serialize(serializer)
    }
}

/// Per-call overrides of the executor defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Option<Duration>,
    pub max_output_bytes: Option<usize>,
}

/// Something that can run an approved command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, limits: RunLimits) -> Result<ExecutionResult, ExecutionError>;
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `command`, waiting at most `timeout` (or [`DEFAULT_TIMEOUT`]).
    ///
    /// A non-zero exit or a timeout is a normal result. Only failing to
    /// spawn or to wait on the process is an error.
    pub async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run_capped(command, timeout, self.config.max_output_bytes)
            .await
    }

    async fn run_capped(
        &self,
        command: &str,
        timeout: Option<Duration>,
        max_output_bytes: usize,
    ) -> Result<ExecutionResult, ExecutionError> {
        if command.trim().is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }
        let deadline = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let started = Instant::now();

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            shell: self.config.shell.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(command, pid, ?deadline, "spawned");

        // Covers every exit path, including cancellation of this future.
        let group = DropGuard::with(move || {
            if let Some(pid) = pid {
                if let Err(err) = kill_process_group(pid) {
                    debug!(pid, error = %err, "failed to kill process group");
                }
            }
        });

        let output = Arc::new(Mutex::new(OutputBuffer::new(max_output_bytes)));
        let readers: Vec<JoinHandle<io::Result<()>>> = [
            child.stdout.take().map(|out| spawn_reader(out, output.clone())),
            child.stderr.take().map(|err| spawn_reader(err, output.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let finished = match tokio::time::timeout(deadline, wait_for_exit(&mut child)).await {
            Ok(exited) => {
                exited?;
                true
            }
            Err(_) => false,
        };
        // Background jobs left in the group would keep the pipes open. The
        // leader is not reaped yet, so its pid still names this group.
        drop(group);
        if !finished {
            warn!(command, pid, ?deadline, "deadline exceeded, killed process group");
            if let Err(err) = child.start_kill() {
                debug!(pid, error = %err, "child already gone");
            }
        }
        let status = child.wait().await?;
        let status = finished.then_some(status);

        join_readers(readers).await;
        let buffer = output
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default();

        let result = ExecutionResult {
            command: command.to_string(),
            combined_output: buffer.bytes,
            exit_code: status.map_or(-1, exit_code),
            timed_out: status.is_none(),
            truncated: buffer.truncated,
            duration: started.elapsed(),
        };
        debug!(
            command,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            truncated = result.truncated,
            duration_ms = result.duration.as_millis() as u64,
            "finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl CommandRunner for Executor {
    async fn run(&self, command: &str, limits: RunLimits) -> Result<ExecutionResult, ExecutionError> {
        let cap = limits
            .max_output_bytes
            .unwrap_or(self.config.max_output_bytes);
        self.run_capped(command, limits.timeout, cap).await
    }
}

#[derive(Debug, Default)]
struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Keeps reading past the cap so the child never blocks on a full pipe.
fn spawn_reader<R>(mut reader: R, sink: Arc<Mutex<OutputBuffer>>) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            sink.lock()
                .map_err(|_| io::Error::other("output buffer poisoned"))?
                .push(&chunk[..n]);
        }
    })
}

async fn join_readers(readers: Vec<JoinHandle<io::Result<()>>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        match tokio::time::timeout(DRAIN_GRACE, reader).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => debug!(error = %err, "output reader failed"),
            Ok(Err(err)) => debug!(error = %err, "output reader panicked"),
            Err(_) => {
                abort.abort();
                debug!("output reader still open after grace period");
            }
        }
    }
}

/// Resolves once the child has exited. On Linux the child is left unreaped.
async fn wait_for_exit(child: &mut Child) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    if let Some(pid) = child.id() {
        match exited_unreaped(pid).await {
            Ok(()) => return Ok(()),
            Err(err) => debug!(pid, error = %err, "waitid failed, reaping instead"),
        }
    }
    // Elsewhere the group is killed after reaping and the pid may be reused in between.
    child.wait().await.map(drop)
}

/// Poll `waitid(WNOWAIT)` until `pid` has exited, without collecting its status.
#[cfg(target_os = "linux")]
async fn exited_unreaped(pid: u32) -> io::Result<()> {
    loop {
        let exited = {
            // SAFETY: all-zero bytes are a valid siginfo_t.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` is a live, writable siginfo_t for the duration of the call.
            let result = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT | libc::WNOHANG,
                )
            };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: waitid filled `info` or left it zeroed under WNOHANG.
            (unsafe { info.si_pid() }) != 0
        };
        if exited {
            return Ok(());
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// SIGKILL every process in group `pgid`. A group that no longer exists is fine.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return Ok(());
    };
    // SAFETY: killpg takes no pointers; an unknown group yields ESRCH.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}
