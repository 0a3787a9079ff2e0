//! External agent process execution with line-oriented streaming.
//!
//! The runner owns the full child lifecycle: spawn inside the sandbox with
//! a sanitized environment, feed the prompt over stdin, read stdout in
//! small chunks under a poll timeout, drain stderr concurrently, and
//! surface exactly one terminal event. If the caller walks away from the
//! stream the child is terminated rather than leaked.

mod lines;
mod retry;

pub(crate) use lines::LineAccumulator;
pub(crate) use retry::{run_with_retry, RetryPolicy};

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::EngineError;

/// One event on the outbound stream. Every run produces zero or more
/// `Text` events followed by exactly one terminal event.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// A complete output line (newline restored) or the trailing partial
    /// line flushed at end of stream.
    Text(String),
    /// The process exited with status zero.
    Completed,
    /// Spawn failure, non-zero exit, or timeout.
    Failed(EngineError),
}

/// Timing and buffer knobs for the read loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunnerConfig {
    /// How long a single read may wait before re-checking liveness and
    /// cancellation.
    pub poll_timeout: Duration,
    /// Hard ceiling on the whole run.
    pub overall_timeout: Duration,
    /// Pause between graceful terminate and forced kill.
    pub grace_timeout: Duration,
    /// Stdout read chunk size.
    pub chunk_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(600),
            grace_timeout: Duration::from_secs(2),
            chunk_size: 1024,
        }
    }
}

/// Everything needed to invoke one agent binary.
#[derive(Debug, Clone)]
pub(crate) struct RunSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Variable names stripped from the child's environment.
    pub env_remove: Vec<String>,
    /// Variables set for the child only.
    pub env_set: Vec<(String, String)>,
    /// Prompt bytes for stdin; `None` closes stdin immediately.
    pub stdin_payload: Option<String>,
}

impl RunSpec {
    pub fn new(binary: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            env_remove: Vec::new(),
            env_set: Vec::new(),
            stdin_payload: None,
        }
    }
}

/// Spawns the process and returns the event stream.
///
/// Spawn failure is returned directly; every later failure arrives as a
/// terminal [`StreamEvent::Failed`] on the channel instead, so consumers
/// see one uniform shape.
pub(crate) fn spawn_streaming(
    spec: RunSpec,
    config: RunnerConfig,
) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
    let mut command = Command::new(&spec.binary);
    command
        .args(&spec.args)
        .current_dir(&spec.workdir)
        .stdin(if spec.stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for name in &spec.env_remove {
        command.env_remove(name);
    }
    for (name, value) in &spec.env_set {
        command.env(name, value);
    }

    let child = command
        .spawn()
        .map_err(|e| EngineError::spawn(&spec.binary, e.to_string()))?;
    debug!("Spawned '{}' in {}", spec.binary, spec.workdir.display());

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(drive(child, spec.stdin_payload, config, tx));
    Ok(rx)
}

/// Runs to completion and concatenates the text events.
pub(crate) async fn run_capture(spec: RunSpec, config: RunnerConfig) -> Result<String, EngineError> {
    let mut rx = spawn_streaming(spec, config)?;
    let mut output = String::new();

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Text(text) => output.push_str(&text),
            StreamEvent::Completed => return Ok(output),
            StreamEvent::Failed(err) => return Err(err),
        }
    }

    // Channel closed without a terminal event: the drive task panicked.
    Err(EngineError::process_exit(
        None,
        "output stream ended without a terminal event".to_string(),
    ))
}

/// The read loop task. Owns the child and guarantees it does not outlive
/// the stream: consumer hang-up and timeout both terminate the process.
async fn drive(
    mut child: Child,
    stdin_payload: Option<String>,
    config: RunnerConfig,
    tx: mpsc::Sender<StreamEvent>,
) {
    if let (Some(payload), Some(mut stdin)) = (stdin_payload, child.stdin.take()) {
        // A child that exits before reading everything gives a broken
        // pipe here; its exit status tells the real story.
        if let Err(e) = stdin.write_all(payload.as_bytes()).await {
            warn!("Writing prompt to child stdin failed: {e}");
        }
        drop(stdin);
    }

    let Some(mut stdout) = child.stdout.take() else {
        let _ = tx
            .send(StreamEvent::Failed(EngineError::process_exit(
                None,
                "child stdout pipe missing".to_string(),
            )))
            .await;
        return;
    };

    // Drain stderr concurrently so the child never blocks on a full pipe.
    // The content is diagnostic only, reported on non-zero exit.
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut collected = Vec::new();
            let _ = stderr.read_to_end(&mut collected).await;
            String::from_utf8_lossy(&collected).into_owned()
        })
    });

    let deadline = Instant::now() + config.overall_timeout;
    let mut accumulator = LineAccumulator::new();
    let mut buf = vec![0u8; config.chunk_size];

    loop {
        // Checked every pass, not just on idle polls: a child that keeps
        // the pipe busy must still hit the ceiling.
        if Instant::now() >= deadline {
            graceful_terminate(&mut child, config.grace_timeout).await;
            let _ = tx
                .send(StreamEvent::Failed(EngineError::timeout(
                    config.overall_timeout,
                )))
                .await;
            return;
        }

        tokio::select! {
            // Consumer hung up: stop reading and reap the child.
            () = tx.closed() => {
                debug!("Stream consumer gone; terminating child");
                graceful_terminate(&mut child, config.grace_timeout).await;
                return;
            }
            read = tokio::time::timeout(config.poll_timeout, stdout.read(&mut buf)) => {
                match read {
                    // Poll expired with no bytes; the loop head re-checks
                    // the ceiling.
                    Err(_) => {}
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => {
                        for line in accumulator.push_bytes(&buf[..n]) {
                            let mut line = line;
                            line.push('\n');
                            if tx.send(StreamEvent::Text(line)).await.is_err() {
                                graceful_terminate(&mut child, config.grace_timeout).await;
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Reading child stdout failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    // Stdout hit EOF; collect the exit status and stderr.
    let status = match tokio::time::timeout(config.grace_timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            let _ = tx
                .send(StreamEvent::Failed(EngineError::process_exit(
                    None,
                    format!("waiting for child failed: {e}"),
                )))
                .await;
            return;
        }
        Err(_) => {
            // The grace window is what expired here, not the run ceiling.
            graceful_terminate(&mut child, config.grace_timeout).await;
            let _ = tx
                .send(StreamEvent::Failed(EngineError::timeout(
                    config.grace_timeout,
                )))
                .await;
            return;
        }
    };

    let stderr_text = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        if let Some(remainder) = accumulator.flush_remainder() {
            if tx.send(StreamEvent::Text(remainder)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(StreamEvent::Completed).await;
    } else {
        if !stderr_text.trim().is_empty() {
            warn!("Child exited {:?}: {}", status.code(), stderr_text.trim());
        }
        let _ = tx
            .send(StreamEvent::Failed(EngineError::process_exit(
                status.code(),
                stderr_text,
            )))
            .await;
    }
}

/// SIGTERM first, then a forced kill after the grace period. On platforms
/// without signals this is a plain kill.
async fn graceful_terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) with a PID we own and have not yet reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 && tokio::time::timeout(grace, child.wait()).await.is_ok() {
            debug!("Child {pid} exited after SIGTERM");
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        warn!("Forced kill failed: {e}");
    }
}
