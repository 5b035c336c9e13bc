//! Out-of-process execution of the analysis script
//!
//! [`ProcessRunner::execute`] launches `<interpreter> "<script>" -d "<output>"
//! <flags...>`, captures both output streams line by line while the process
//! runs, and honours a [`CancellationToken`]. It never returns an error:
//! launch failures, non-zero exits and cancellations are all reported in the
//! [`ExecutionResult`].
//!
//! On Unix the child leads its own process group, so cancelling signals the
//! whole group and takes down the interpreter and anything it spawned. On
//! Windows the tree is killed with `taskkill /T /F`.
//!
//! Output is decoded lossily, so a stray Latin-1 byte never stops a stream
//! from being drained. Once the child has exited, readers get a short grace
//! period and are then abandoned, in case a detached grandchild still holds
//! the pipes.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;

/// How long to wait for the output readers to drain after the process is gone.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================
// Request
// ============================================

/// Value of a script flag.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Bool(true) => write!(f, "TRUE"),
            ArgValue::Bool(false) => write!(f, "FALSE"),
            // f64's Display never uses grouping or a locale decimal separator.
            ArgValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One `-<flag> <value>` pair passed to the script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptArg {
    pub flag: String,
    pub value: ArgValue,
}

impl ScriptArg {
    pub fn bool(flag: impl Into<String>, value: bool) -> Self {
        Self {
            flag: flag.into(),
            value: ArgValue::Bool(value),
        }
    }

    pub fn number(flag: impl Into<String>, value: f64) -> Self {
        Self {
            flag: flag.into(),
            value: ArgValue::Number(value),
        }
    }
}

impl std::str::FromStr for ScriptArg {
    type Err = Error;

    /// Parse `flag=value`, where value is `true`/`false` (any case) or a number.
    fn from_str(s: &str) -> Result<Self> {
        let (flag, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected flag=value, got {:?}", s)))?;
        let flag = flag.trim().trim_start_matches('-');
        if flag.is_empty() {
            return Err(Error::Config(format!("empty flag name in {:?}", s)));
        }
        let value = value.trim();
        if value.eq_ignore_ascii_case("true") {
            return Ok(Self::bool(flag, true));
        }
        if value.eq_ignore_ascii_case("false") {
            return Ok(Self::bool(flag, false));
        }
        match value.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Self::number(flag, n)),
            _ => Err(Error::Config(format!(
                "value for -{} must be TRUE, FALSE or a number, got {:?}",
                flag, value
            ))),
        }
    }
}

/// Everything needed to launch one analysis run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub args: Vec<ScriptArg>,
}

impl ExecutionRequest {
    /// Arguments after the interpreter, in order.
    pub fn arguments(&self) -> Vec<String> {
        let mut out = vec![
            self.script.to_string_lossy().into_owned(),
            "-d".to_string(),
            self.output_dir.to_string_lossy().into_owned(),
        ];
        for arg in &self.args {
            out.push(format!("-{}", arg.flag));
            out.push(arg.value.to_string());
        }
        out
    }

    /// Human-readable command line, for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = format!(
            "{} \"{}\" -d \"{}\"",
            self.interpreter.display(),
            self.script.display(),
            self.output_dir.display()
        );
        for arg in &self.args {
            line.push_str(&format!(" -{} {}", arg.flag, arg.value));
        }
        line
    }
}

// ============================================
// Result
// ============================================

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A line of process output, forwarded as it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Outcome of one analysis run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    /// Set when the process could not be launched at all
    pub start_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    /// Convert into a `Result`, for callers that want `?`.
    pub fn into_result(self) -> Result<Self> {
        if let Some(message) = &self.start_error {
            return Err(Error::ProcessStart(message.clone()));
        }
        if self.cancelled {
            return Err(Error::ProcessCancelled);
        }
        if !self.success {
            return Err(Error::ProcessFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            });
        }
        Ok(self)
    }
}

// ============================================
// Runner
// ============================================

/// Launches the analysis interpreter and supervises it.
#[derive(Default)]
pub struct ProcessRunner {
    observer: Option<UnboundedSender<OutputLine>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every captured line to `observer` (e.g. a progress display).
    pub fn with_observer(observer: UnboundedSender<OutputLine>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// Run the request to completion, failure, or cancellation.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let started = Instant::now();

        let mut cmd = Command::new(&request.interpreter);
        cmd.args(request.arguments())
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::info!(command = %request.command_line(), "Starting analysis process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    interpreter = %request.interpreter.display(),
                    error = %e,
                    "Failed to start analysis process"
                );
                let message = format!("{}: {}", request.interpreter.display(), e);
                return ExecutionResult {
                    success: false,
                    stdout: String::new(),
                    stderr: message.clone(),
                    exit_code: None,
                    cancelled: false,
                    start_error: Some(message),
                    started_at,
                    duration: started.elapsed(),
                };
            }
        };
        let pid = child.id();

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stdout_task = child.stdout.take().map(|out| {
            self.spawn_reader(out, Stream::Stdout, stdout_buf.clone())
        });
        let stderr_task = child.stderr.take().map(|err| {
            self.spawn_reader(err, Stream::Stderr, stderr_buf.clone())
        });

        let (exit_code, cancelled) = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => (status.code(), false),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed waiting for analysis process");
                    append_line(&stderr_buf, &format!("wait failed: {}", e));
                    (None, false)
                }
            },
            () = cancel.cancelled() => {
                tracing::info!(pid = ?pid, "Cancellation requested; killing process tree");
                kill_tree(pid);
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "Kill after tree kill failed");
                }
                let _ = child.wait().await;
                (None, true)
            }
        };

        // A background grandchild can hold the pipes open after the child
        // exits; both readers share one deadline and are aborted past it.
        let mut readers: Vec<JoinHandle<()>> =
            [stdout_task, stderr_task].into_iter().flatten().collect();
        let deadline = tokio::time::Instant::now() + IO_DRAIN_TIMEOUT;
        for reader in &mut readers {
            if timeout_at(deadline, &mut *reader).await.is_err() {
                tracing::warn!("Output reader did not finish in time; abandoning it");
            }
        }
        for reader in &readers {
            reader.abort();
        }

        let stdout = take_buffer(&stdout_buf);
        let stderr = take_buffer(&stderr_buf);
        let success = !cancelled && exit_code == Some(0);
        let duration = started.elapsed();

        tracing::info!(
            success,
            cancelled,
            exit_code = ?exit_code,
            duration_ms = duration.as_millis() as u64,
            "Analysis process finished"
        );

        ExecutionResult {
            success,
            stdout,
            stderr,
            exit_code,
            cancelled,
            start_error: None,
            started_at,
            duration,
        }
    }

    fn spawn_reader<R>(
        &self,
        reader: R,
        stream: Stream,
        buffer: Arc<Mutex<String>>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let observer = self.observer.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&raw);
                        append_line(&buffer, &line);
                        if let Some(observer) = &observer {
                            let _ = observer.send(OutputLine { stream, text: line });
                        }
                    }
                    Err(e) => {
                        tracing::debug!(stream = ?stream, error = %e, "Output stream read failed");
                        break;
                    }
                }
            }
        })
    }
}

/// One output line without its terminator. Bytes that are not UTF-8 (e.g.
/// Latin-1 output from the interpreter) become U+FFFD.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn append_line(buffer: &Mutex<String>, line: &str) {
    if let Ok(mut buf) = buffer.lock() {
        buf.push_str(line);
        buf.push('\n');
    }
}

fn take_buffer(buffer: &Mutex<String>) -> String {
    buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default()
}

/// Best-effort kill of the process and everything it started.
#[cfg(unix)]
fn kill_tree(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    // The child leads its own group (process_group(0)), so -pid targets the whole tree.
    let result = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if result != 0 {
        tracing::debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Process group kill failed"
        );
    }
}

/// Best-effort kill of the process and everything it started.
#[cfg(windows)]
fn kill_tree(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let result = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::debug!(pid, error = %e, "Process tree kill failed");
    }
}
