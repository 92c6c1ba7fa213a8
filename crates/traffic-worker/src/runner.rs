//! Launching workers as child processes
//!
//! A worker is any program that takes the symbol (and optionally an as-of
//! date) as trailing arguments, prints progress to stdout and finishes with a
//! payload line. The launcher accumulates stdout, enforces the per-worker
//! timeout and converts every way a process can end into a [`WorkerResult`].

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::kind::WorkerKind;
use crate::result::{WorkerResult, WorkerStatus};
use crate::spec::{Invocation, WorkerSpec};

/// A stdout line the worker's spec marks as live progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLine {
    pub kind: WorkerKind,
    pub line: String,
}

/// Where forwarded progress lines go
pub type ProgressLineSender = mpsc::UnboundedSender<ProgressLine>;

/// Runs one worker to a terminal result
///
/// Implementations never return an error: spawn failures, crashes, timeouts
/// and unparsable output all come back as a non-success [`WorkerResult`].
/// Dropping the returned future must stop the worker.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn run(&self, spec: &WorkerSpec, invocation: &Invocation) -> WorkerResult;

    /// Run while forwarding progress lines in output order
    ///
    /// Launchers without live output fall back to [`WorkerLauncher::run`].
    async fn run_with_progress(
        &self,
        spec: &WorkerSpec,
        invocation: &Invocation,
        progress: ProgressLineSender,
    ) -> WorkerResult {
        drop(progress);
        self.run(spec, invocation).await
    }
}

/// Shared handle to a launcher
pub type ArcWorkerLauncher = Arc<dyn WorkerLauncher>;

/// Launcher backed by OS processes
///
/// Each worker runs as the leader of its own process group. The group is
/// killed once the worker exits, times out or is dropped, so helpers it
/// forked can neither outlive it nor hold its pipes open.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    fn build_command(spec: &WorkerSpec, invocation: &Invocation) -> Command {
        let mut command = Command::new(&spec.command);
        command
            .args(spec.command_args(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        for (key, value) in &spec.env {
            command.env(key, value);
        }

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        command
    }

    async fn execute(
        &self,
        spec: &WorkerSpec,
        invocation: &Invocation,
        progress: Option<ProgressLineSender>,
    ) -> WorkerResult {
        let started = Instant::now();
        let name = spec.name();

        debug!(
            "Starting worker {}: {} {:?}",
            name,
            spec.command,
            spec.command_args(invocation)
        );

        let mut child = match Self::build_command(spec, invocation).spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = WorkerError::SpawnFailed(format!("{}: {}", spec.command, e));
                warn!("Worker {} for {}: {}", name, invocation.symbol, err);
                return WorkerResult::failed(spec.kind, err.to_string())
                    .with_duration_ms(elapsed_ms(started));
            }
        };

        let mut group = ProcessGroup::new(child.id());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut raw_output = String::new();
        let mut stderr_bytes = Vec::new();
        let forward = |line: &str| {
            if let Some(progress) = progress.as_ref().filter(|_| spec.is_progress_line(line)) {
                let _ = progress.send(ProgressLine {
                    kind: spec.kind,
                    line: line.to_string(),
                });
            }
        };

        // one deadline covers the exit and draining both pipes
        let finished = tokio::time::timeout(spec.timeout, async {
            let (status, (), ()) = tokio::join!(
                async {
                    let status = child.wait().await;
                    group.kill();
                    status
                },
                read_lines(name, stdout, &mut raw_output, forward),
                read_all(stderr, &mut stderr_bytes),
            );
            status
        })
        .await;

        let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
        let duration_ms = elapsed_ms(started);

        let status = match finished {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Worker {} wait failed: {}", name, e);
                return WorkerResult::failed(spec.kind, WorkerError::IoError(e).to_string())
                    .with_raw_output(raw_output)
                    .with_stderr_excerpt(&stderr)
                    .with_duration_ms(duration_ms);
            }
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    debug!("Worker {} already gone: {}", name, e);
                }
                let after_ms = spec.timeout.as_millis() as u64;
                warn!(
                    "Worker {} for {}: {}",
                    name,
                    invocation.symbol,
                    WorkerError::TimedOut { after_ms }
                );
                return WorkerResult::timed_out(spec.kind, after_ms)
                    .with_raw_output(raw_output)
                    .with_stderr_excerpt(&stderr);
            }
        };

        if !status.success() {
            let err = WorkerError::ExitedNonZero {
                code: status.code(),
                stderr: last_line(&stderr).to_string(),
            };
            warn!("Worker {} for {}: {}", name, invocation.symbol, err);
            return WorkerResult::failed(spec.kind, err.to_string())
                .with_raw_output(raw_output)
                .with_exit_code(status.code())
                .with_stderr_excerpt(&stderr)
                .with_duration_ms(duration_ms);
        }

        let mut result = WorkerResult::running(spec.kind)
            .with_raw_output(raw_output)
            .with_exit_code(status.code())
            .with_stderr_excerpt(&stderr)
            .with_duration_ms(duration_ms);

        match spec.parser.parse(&result.raw_output) {
            Ok(payload) => {
                info!(
                    "Worker {} for {} succeeded in {}ms",
                    name, invocation.symbol, duration_ms
                );
                result.complete(WorkerStatus::Success, Some(payload), None);
            }
            Err(e) => {
                warn!("Worker {} for {}: {}", name, invocation.symbol, e);
                result.complete(WorkerStatus::Failed, None, Some(e.to_string()));
            }
        }

        result
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn run(&self, spec: &WorkerSpec, invocation: &Invocation) -> WorkerResult {
        self.execute(spec, invocation, None).await
    }

    async fn run_with_progress(
        &self,
        spec: &WorkerSpec,
        invocation: &Invocation,
        progress: ProgressLineSender,
    ) -> WorkerResult {
        self.execute(spec, invocation, Some(progress)).await
    }
}

/// The worker's process group, killed at most once
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Send SIGKILL to every process in the group
#[cfg(unix)]
fn kill_group(pgid: u32) {
    // tokio reaps the dropped `kill` child in the background
    if tokio::runtime::Handle::try_current().is_err() {
        return;
    }
    let spawned = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{pgid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        debug!("Could not signal process group {}: {}", pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Append stdout to `output` line by line, forwarding each line to `on_line`
///
/// Invalid UTF-8 is replaced rather than ending the read, so the pipe is
/// always drained to EOF.
async fn read_lines<R, F>(
    name: &'static str,
    reader: Option<R>,
    output: &mut String,
    mut on_line: F,
) where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                debug!("[{}] {}", name, line);
                on_line(line);
                output.push_str(line);
                output.push('\n');
            }
            Err(e) => {
                debug!("[{}] stdout read error: {}", name, e);
                break;
            }
        }
    }
}

/// Append everything from `reader` to `output`, chunk by chunk
async fn read_all<R>(reader: Option<R>, output: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => output.extend_from_slice(&chunk[..n]),
        }
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
