//! FFmpeg process runner.
//!
//! Spawns the binary directly (never through a shell) in its own process
//! group, drains stdout/stderr into bounded buffers and enforces a timeout by
//! terminating the whole group.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Default cap for each captured stream.
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Result of a completed process.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code, `None` if the process was ended by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout (tail, possibly truncated)
    pub stdout: Vec<u8>,
    /// Captured stderr (tail, possibly truncated)
    pub stderr: Vec<u8>,
    /// Whether stdout exceeded the capture limit
    pub stdout_truncated: bool,
    /// Whether stderr exceeded the capture limit
    pub stderr_truncated: bool,
    /// Wall-clock run time
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Exit code 0 is the only success signal.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Stderr as text, replacing invalid UTF-8.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Keeps the last `limit` bytes of a stream.
#[derive(Debug)]
pub struct TailBuffer {
    buf: Vec<u8>,
    limit: usize,
    total: u64,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        self.buf.extend_from_slice(chunk);

        // Compact lazily so pushes stay amortized O(n).
        if self.buf.len() > self.limit.saturating_mul(2).max(8192) {
            self.trim();
        }
    }

    fn trim(&mut self) {
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
        }
    }

    /// Finish capturing. Truncated output is prefixed with a marker.
    pub fn finish(mut self) -> (Vec<u8>, bool) {
        self.trim();
        let truncated = self.total > self.limit as u64;
        if !truncated {
            return (self.buf, false);
        }

        let dropped = self.total - self.limit as u64;
        let mut out = format!("[... {} bytes truncated ...]\n", dropped).into_bytes();
        out.extend_from_slice(&self.buf);
        (out, true)
    }
}

/// Runner for external processes with bounded capture and timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Cap per captured stream
    output_limit: usize,
    /// Grace period between SIGTERM and SIGKILL
    kill_grace: Duration,
    /// Working directory for the child
    working_dir: Option<PathBuf>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            output_limit: DEFAULT_OUTPUT_LIMIT,
            kill_grace: DEFAULT_KILL_GRACE,
            working_dir: None,
        }
    }

    /// Set the capture limit per stream.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Set the SIGTERM to SIGKILL grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Run the child inside this directory.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run `binary` with `args`, waiting at most `timeout`.
    ///
    /// A nonzero exit is not an error here; the outcome is returned intact so
    /// the caller can classify it and log diagnostics.
    pub async fn run(
        &self,
        binary: &Path,
        args: &[String],
        timeout: Duration,
    ) -> MediaResult<ProcessOutcome> {
        let start = Instant::now();

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(MediaError::Spawn)?;
        debug!(pid = ?child.id(), "Spawned process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        let stdout_task = tokio::spawn(read_bounded(stdout, self.output_limit));
        let stderr_task = tokio::spawn(read_bounded(stderr, self.output_limit));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Process timed out, terminating process group"
                );
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(MediaError::Timeout(timeout));
            }
        };

        let (stdout, stdout_truncated) = self.collect(stdout_task).await;
        let (stderr, stderr_truncated) = self.collect(stderr_task).await;

        Ok(ProcessOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration: start.elapsed(),
        })
    }

    /// SIGTERM the group, wait for the grace period, then SIGKILL it.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let group = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                debug!("SIGTERM to process group failed: {}", e);
            }

            if tokio::time::timeout(self.kill_grace, child.wait())
                .await
                .is_err()
            {
                warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
            }

            // Stragglers in the group are killed even if the leader exited.
            let _ = killpg(group, Signal::SIGKILL);
        }

        if let Err(e) = child.kill().await {
            debug!("Final kill of child failed: {}", e);
        }
    }

    /// Join a reader task. Descendants may hold the pipe open, so the wait is bounded.
    async fn collect(&self, task: JoinHandle<std::io::Result<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
        match tokio::time::timeout(self.kill_grace, task).await {
            Ok(Ok(Ok(captured))) => captured,
            Ok(Ok(Err(e))) => {
                warn!("Failed to read process output: {}", e);
                (Vec::new(), false)
            }
            Ok(Err(e)) => {
                warn!("Output reader task failed: {}", e);
                (Vec::new(), false)
            }
            Err(_) => {
                warn!("Timed out draining process output");
                (Vec::new(), false)
            }
        }
    }
}

async fn read_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(limit);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        tail.push(&chunk[..n]);
    }

    Ok(tail.finish())
}
