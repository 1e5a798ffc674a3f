use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};

use super::encoder::{CaptureJobSpec, EncoderConfig, capture_args};
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::lock::lock_mutex;
use crate::core::logging::{ComponentLogger, LogContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitKind {
    Success,
    Failure,
    Killed,
}

/// The single completion signal of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    pub kind: ExitKind,
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.kind == ExitKind::Success
    }

    fn from_status(status: io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) if status.success() => Self {
                kind: ExitKind::Success,
                code: status.code(),
            },
            Ok(status) => Self {
                kind: ExitKind::Failure,
                code: status.code(),
            },
            Err(_) => Self::lost(),
        }
    }

    fn killed() -> Self {
        Self {
            kind: ExitKind::Killed,
            code: None,
        }
    }

    fn lost() -> Self {
        Self {
            kind: ExitKind::Failure,
            code: None,
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.code) {
            (ExitKind::Killed, _) => write!(f, "killed"),
            (_, Some(code)) => write!(f, "exit code {}", code),
            (_, None) => write!(f, "terminated by signal"),
        }
    }
}

/// Runtime handle to one encoder process. Never reused across jobs.
///
/// Dropping a live handle requests a graceful stop with the default grace
/// period; the monitor task finishes the shutdown in the background.
pub struct ProcessHandle {
    id: u64,
    label: String,
    pid: Option<u32>,
    job: Option<CaptureJobSpec>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    stop_tx: Mutex<Option<oneshot::Sender<Duration>>>,
    default_grace: Duration,
}

impl ProcessHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn job(&self) -> Option<&CaptureJobSpec> {
        self.job.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or_else(ProcessExit::lost),
            Err(_) => ProcessExit::lost(),
        }
    }

    /// Sends the finalize signal and waits for the exit, killing the process
    /// if it outlives `grace`.
    pub async fn request_stop(&self, grace: Duration) -> ProcessExit {
        self.signal_stop(grace);
        self.wait().await
    }

    fn signal_stop(&self, grace: Duration) {
        let stop_tx = lock_mutex(&self.stop_tx, "ProcessHandle::signal_stop").take();
        if let Some(tx) = stop_tx {
            // already exited if the monitor is gone
            let _ = tx.send(grace);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            self.signal_stop(self.default_grace);
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("exit", &self.exit())
            .finish()
    }
}

/// Launches and terminates encoder processes.
pub struct Supervisor {
    encoder: EncoderConfig,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(encoder: EncoderConfig) -> Self {
        Self {
            encoder,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    /// Starts a capture job.
    pub fn start(&self, job: CaptureJobSpec) -> CaptureResult<ProcessHandle> {
        let args = capture_args(&self.encoder, &job);
        self.spawn("capture", args, Some(job))
    }

    pub async fn request_stop(&self, handle: &ProcessHandle, grace: Duration) -> ProcessExit {
        handle.request_stop(grace).await
    }

    pub fn is_alive(&self, handle: &ProcessHandle) -> bool {
        handle.is_alive()
    }

    /// Runs a helper invocation (concat, screenshot) to completion.
    pub async fn run_to_exit(&self, label: &str, args: Vec<String>) -> CaptureResult<ProcessExit> {
        let handle = self.spawn(label, args, None)?;
        Ok(handle.wait().await)
    }

    pub fn spawn(
        &self,
        label: &str,
        args: Vec<String>,
        job: Option<CaptureJobSpec>,
    ) -> CaptureResult<ProcessHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = format!("{}-{}", label, id);
        let args = self.encoder.command_args(args);

        self.debug(&format!("[{}] {} {}", label, self.encoder.program, args.join(" ")));

        let mut child = Command::new(&self.encoder.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let err = CaptureError::spawn(self.encoder.program.clone(), e);
                self.error(&format!("[{}] {}", label, err));
                err
            })?;

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, label.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, label.clone(), "stderr");
        }
        let stdin = child.stdin.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(monitor(child, stdin, stop_rx, exit_tx, label.clone()));

        Ok(ProcessHandle {
            id,
            label,
            pid,
            job,
            exit_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            default_grace: self.encoder.grace(),
        })
    }
}

impl ComponentLogger for Supervisor {
    fn log_context(&self) -> LogContext {
        LogContext::new("Supervisor", &self.encoder.program)
    }
}

enum Wake {
    Exited(io::Result<ExitStatus>),
    Stop(Duration),
}

async fn monitor(
    mut child: Child,
    stdin: Option<ChildStdin>,
    mut stop_rx: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    label: String,
) {
    let logger = ProcessLogger { label };

    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        Ok(grace) = &mut stop_rx => Wake::Stop(grace),
    };

    let exit = match wake {
        Wake::Exited(status) => ProcessExit::from_status(status),
        Wake::Stop(grace) => graceful_stop(&mut child, stdin, grace, &logger).await,
    };

    logger.debug(&format!("exited: {}", exit));
    let _ = exit_tx.send(Some(exit));
}

async fn graceful_stop(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
    logger: &ProcessLogger,
) -> ProcessExit {
    send_finalize(child, stdin, logger).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => ProcessExit::from_status(status),
        Err(_) => {
            logger.warn(&CaptureError::TimeoutEscalation { grace }.to_string());
            if let Err(e) = child.kill().await {
                logger.error(&format!("kill failed: {}", e));
            }
            ProcessExit::killed()
        }
    }
}

#[cfg(unix)]
async fn send_finalize(child: &mut Child, stdin: Option<ChildStdin>, logger: &ProcessLogger) {
    drop(stdin);
    if let Some(pid) = child.id() {
        // SIGINT makes the encoder flush and close the container
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            logger.warn(&format!("SIGINT failed: {}", io::Error::last_os_error()));
        }
    }
}

#[cfg(not(unix))]
async fn send_finalize(_child: &mut Child, stdin: Option<ChildStdin>, logger: &ProcessLogger) {
    use tokio::io::AsyncWriteExt;

    // signal delivery to console grabbers is unreliable here, use the quit key
    if let Some(mut stdin) = stdin {
        if let Err(e) = stdin.write_all(b"q").await {
            logger.warn(&format!("writing quit key failed: {}", e));
        }
        let _ = stdin.flush().await;
    }
}

/// Longest line kept before it is flushed to the log as is.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Splits encoder output on `\n` and `\r`. Progress reports only ever end in
/// `\r`, so a newline-only reader would grow one line for the whole job.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LINE_BYTES {
                    self.flush_into(&mut lines);
                }
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if !self.pending.is_empty() {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
    }
}

fn forward_lines<R>(mut reader: R, label: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let ctx = LogContext::new("Encoder", &label).with_scope(stream);
        let mut splitter = LineSplitter::default();
        let mut buf = [0u8; 4096];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for line in splitter.push(&buf[..n]) {
                log_encoder_line(&ctx, &line);
            }
        }
        if let Some(line) = splitter.finish() {
            log_encoder_line(&ctx, &line);
        }
    });
}

fn log_encoder_line(ctx: &LogContext, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        log::warn!("{}", ctx.format("WARN", line));
    } else {
        log::debug!("{}", ctx.format("DEBUG", line));
    }
}

struct ProcessLogger {
    label: String,
}

impl ComponentLogger for ProcessLogger {
    fn log_context(&self) -> LogContext {
        LogContext::new("Process", &self.label)
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell() -> Supervisor {
        Supervisor::new(EncoderConfig {
            program: "/bin/sh".into(),
            grace_ms: 200,
            ..EncoderConfig::default()
        })
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".into(), body.into()]
    }

    #[tokio::test]
    async fn exit_codes_are_classified() {
        let supervisor = shell();

        let ok = supervisor.run_to_exit("t", script("exit 0")).await.unwrap();
        assert_eq!(ok.kind, ExitKind::Success);

        let failed = supervisor.run_to_exit("t", script("exit 3")).await.unwrap();
        assert_eq!(failed.kind, ExitKind::Failure);
        assert_eq!(failed.code, Some(3));
    }

    #[tokio::test]
    async fn exit_is_observed_once_and_sticks() {
        let supervisor = shell();
        let handle = supervisor.spawn("t", script("exit 0"), None).unwrap();

        let first = handle.wait().await;
        let second = handle.wait().await;
        assert_eq!(first, second);
        assert!(!handle.is_alive());
        assert_eq!(handle.exit(), Some(first));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let supervisor = Supervisor::new(EncoderConfig {
            program: "/nonexistent/encoder-binary".into(),
            ..EncoderConfig::default()
        });
        let err = supervisor.run_to_exit("t", vec![]).await.unwrap_err();
        match err {
            CaptureError::Spawn { kind, .. } => {
                assert_eq!(kind, crate::core::error::SpawnFailureKind::NotFound)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
