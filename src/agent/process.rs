//! Agent process supervision.
//!
//! [`SessionProcess`] owns at most one OS process speaking the agent wire
//! protocol. It has no protocol awareness beyond line framing: JSON
//! parsing and event semantics belong to the session layer. The struct
//! provides lazy startup, line-oriented I/O, a bounded non-blocking drain
//! of already-buffered output, and an escalating stop sequence that never
//! fails past its own boundary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::agent::codec::EventCodec;
use crate::agent::resolver::BINARY_ENV_VAR;
use crate::{AppError, Result};

/// Termination sentinel understood by the agent's interactive loop.
pub const STOP_SENTINEL: &str = "__CELLBRIDGE_STOP__";

/// Upper bound on lines consumed by a single [`SessionProcess::drain_pending`].
pub const DRAIN_MAX_LINES: usize = 50;

/// Poll window used to decide whether a line is already buffered.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Poll interval while waiting for a voluntary exit during stop.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Extra window granted after a terminate signal before the hard kill.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Live stdio handles for a spawned agent process.
struct ChildIo {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: FramedRead<ChildStdout, EventCodec>,
    /// Set once the stdout stream reaches end of data. A process whose
    /// output channel is gone is treated as dead even before the OS has
    /// reaped it, so the next turn restarts instead of writing into a
    /// closed pipe.
    eof: bool,
}

/// One external agent process instance with line-oriented I/O.
pub struct SessionProcess {
    binary: PathBuf,
    env: HashMap<String, String>,
    stop_grace: Duration,
    child: Option<ChildIo>,
}

impl SessionProcess {
    /// Create a process holder for `binary`; nothing is spawned yet.
    #[must_use]
    pub fn new(binary: PathBuf, env: HashMap<String, String>, stop_grace: Duration) -> Self {
        Self {
            binary,
            env,
            stop_grace,
            child: None,
        }
    }

    /// Whether a live child process is currently attached.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(io) => !io.eof && matches!(io.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawn the agent process if none is running.
    ///
    /// The child is launched with `--json-events --json-result` plus a
    /// `--resume <id>` flag when `resume` is provided, the configured
    /// environment overrides, and [`BINARY_ENV_VAR`] pointing at the
    /// executable. Returns `true` when a fresh process was spawned and
    /// `false` when an existing one is still alive (idempotent path).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pipe`] when the OS spawn fails or a stdio
    /// channel cannot be captured.
    pub fn ensure_started(&mut self, resume: Option<&str>) -> Result<bool> {
        if self.is_alive() {
            return Ok(false);
        }
        self.child = None;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--json-events").arg("--json-result");
        if let Some(session_id) = resume {
            cmd.arg("--resume").arg(session_id);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env(BINARY_ENV_VAR, &self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Pipe(format!("failed to spawn agent: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Pipe("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Pipe("failed to capture agent stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            // Detached diagnostics pump; exits when the child closes stderr.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "cellbridge::agent_stderr", "{line}");
                }
            });
        }

        info!(
            binary = %self.binary.display(),
            resume = resume.unwrap_or(""),
            pid = child.id().unwrap_or(0),
            "agent process spawned"
        );

        self.child = Some(ChildIo {
            child,
            stdin: Some(stdin),
            stdout: FramedRead::new(stdout, EventCodec::new()),
            eof: false,
        });
        Ok(true)
    }

    /// Write one line to the agent's stdin, appending the `\n` delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pipe`] when no process is attached or the
    /// write fails (the agent has exited).
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let io = self
            .child
            .as_mut()
            .ok_or_else(|| AppError::Pipe("agent stdin unavailable: no process".into()))?;
        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Pipe("agent stdin unavailable: channel closed".into()))?;
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        stdin
            .write_all(&bytes)
            .await
            .map_err(|err| AppError::Pipe(format!("write to agent stdin failed: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Pipe(format!("flush of agent stdin failed: {err}")))
    }

    /// Read the next line from the agent's stdout.
    ///
    /// Blocks until a line is available; returns `None` once the channel
    /// closes (or no process is attached). Oversized lines rejected by
    /// the codec are skipped with a warning, and I/O errors on the stream
    /// are treated as end of output.
    pub async fn read_line(&mut self) -> Option<String> {
        loop {
            let io = self.child.as_mut()?;
            match io.stdout.next().await {
                None => {
                    io.eof = true;
                    return None;
                }
                Some(Ok(line)) => return Some(line),
                Some(Err(AppError::Protocol(msg))) => {
                    warn!(error = %msg, "oversized agent line skipped");
                }
                Some(Err(err)) => {
                    warn!(error = %err, "agent stdout read failed; treating stream as closed");
                    io.eof = true;
                    return None;
                }
            }
        }
    }

    /// Consume already-buffered output without blocking on new output.
    ///
    /// Reads at most [`DRAIN_MAX_LINES`] lines; each drained line is
    /// offered to `sink` so the caller can still inspect it (metadata
    /// capture). Stops early at end of data or when nothing more is
    /// buffered within the poll window.
    pub async fn drain_pending(&mut self, sink: &mut (dyn FnMut(&str) + Send)) {
        if let Some(io) = self.child.as_mut() {
            drain_io(io, sink).await;
        }
    }

    /// Stop the agent process, escalating as needed.
    ///
    /// Sends the [`STOP_SENTINEL`] line when stdin is still writable,
    /// polls for a voluntary exit within the configured grace window
    /// (draining buffered output to `sink` meanwhile), then escalates to
    /// a terminate signal and finally a hard kill. The handle is always
    /// cleared on return; internal failures are logged and swallowed
    /// because shutdown must be unconditional.
    pub async fn stop(&mut self, sink: &mut (dyn FnMut(&str) + Send)) {
        let Some(mut io) = self.child.take() else {
            return;
        };

        if let Some(mut writer) = io.stdin.take() {
            let mut sentinel = Vec::with_capacity(STOP_SENTINEL.len() + 1);
            sentinel.extend_from_slice(STOP_SENTINEL.as_bytes());
            sentinel.push(b'\n');
            if let Err(err) = writer.write_all(&sentinel).await {
                debug!(error = %err, "stop sentinel write failed; agent likely exited");
            } else if let Err(err) = writer.flush().await {
                debug!(error = %err, "stop sentinel flush failed");
            }
            // Dropping stdin closes the pipe, a second exit signal for
            // agents that read to EOF rather than watching for the sentinel.
            drop(writer);
        }

        let deadline = Instant::now() + self.stop_grace;
        while Instant::now() < deadline {
            if !matches!(io.child.try_wait(), Ok(None)) {
                break;
            }
            drain_io(&mut io, sink).await;
            sleep(STOP_POLL).await;
        }
        drain_io(&mut io, sink).await;

        if matches!(io.child.try_wait(), Ok(None)) {
            warn!("agent ignored stop sentinel; sending terminate signal");
            terminate(&mut io.child);
            let term_deadline = Instant::now() + TERM_GRACE;
            while Instant::now() < term_deadline {
                if !matches!(io.child.try_wait(), Ok(None)) {
                    break;
                }
                sleep(STOP_POLL).await;
            }
            drain_io(&mut io, sink).await;
        }

        if matches!(io.child.try_wait(), Ok(None)) {
            warn!("agent survived terminate signal; killing");
            if let Err(err) = io.child.kill().await {
                warn!(error = %err, "kill of agent process failed");
            }
        }

        info!("agent process stopped");
    }
}

/// Bounded best-effort drain of a child's stdout stream.
async fn drain_io(io: &mut ChildIo, sink: &mut (dyn FnMut(&str) + Send)) {
    if io.eof {
        return;
    }
    for _ in 0..DRAIN_MAX_LINES {
        match timeout(DRAIN_POLL, io.stdout.next()).await {
            Ok(Some(Ok(line))) => sink(&line),
            Ok(Some(Err(err))) => {
                debug!(error = %err, "bad line dropped while draining");
            }
            Ok(None) => {
                // End of data; the conversation channel is gone.
                io.eof = true;
                break;
            }
            // Nothing buffered within the poll window.
            Err(_) => break,
        }
    }
}

/// Deliver a polite terminate signal, platform permitting.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(error = %err, "SIGTERM delivery failed");
        }
    }
}

/// Fallback for platforms without a distinct terminate signal.
#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "start_kill failed");
    }
}
