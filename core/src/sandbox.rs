//! Running source code through the external sandboxed interpreter.
//!
//! Isolation is entirely the sandbox executable's job. This module only feeds
//! it source on stdin, bounds how long it runs and how much output we keep,
//! and classifies how it ended.

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::locate::locate_executable;

/// Reported by the sandbox controller when the interpreter aborts.
pub const SIGIOT_MARKER: &str = "[Subprocess killed by SIGIOT]";
pub const NO_OUTPUT: &str = "No output.";
pub const NOT_PERMITTED: &str = "operation not permitted in the sandbox.";

const IMPORT_SITE_NOISE: &str = "'import site' failed";
const READ_CHUNK_SIZE: usize = 8192;
/// How long to wait for output pipes to close once the child is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Crashed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Selected output: stdout when there is any, else the last stderr line.
    pub stdout_text: String,
    pub exit_status: ExitOutcome,
    /// Set when a stream hit the capture cap.
    pub truncated: bool,
}

impl EvaluationResult {
    fn timed_out() -> Self {
        Self {
            stdout_text: String::new(),
            exit_status: ExitOutcome::TimedOut,
            truncated: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxInvoker {
    program: PathBuf,
    args: Vec<String>,
    sandbox_dir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl SandboxInvoker {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        sandbox_dir: PathBuf,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            program,
            args,
            sandbox_dir,
            timeout,
            max_output_bytes,
        }
    }

    /// Locate the configured sandbox executable. Fails with
    /// `MissingDependency` when it is not installed.
    pub fn from_config(config: &SandboxConfig, home: &Path) -> Result<Self> {
        let program = locate_executable(&config.program)?;
        debug!("using sandbox executable: {}", program.display());
        Ok(Self::new(
            program,
            config.args.clone(),
            config.resolved_sandbox_dir(home),
            config.timeout(),
            config.max_output_bytes,
        ))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn expanded_args(&self) -> Vec<String> {
        let timeout = self.timeout.as_secs().max(1).to_string();
        let sandbox_dir = self.sandbox_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{timeout}", &timeout)
                    .replace("{sandbox_dir}", &sandbox_dir)
            })
            .collect()
    }

    /// Run `source` once.
    ///
    /// Crashes and timeouts are reported through [`ExitOutcome`]; only a
    /// failure to start the process is an error.
    pub async fn invoke(&self, source: &str) -> Result<EvaluationResult> {
        if !self.sandbox_dir.exists() {
            std::fs::create_dir_all(&self.sandbox_dir)?;
        }
        let args = self.expanded_args();
        trace!("spawning sandbox: {:?} {args:?}", self.program);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The interpreter runs under a controller; killing the group reaches both.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn()?;

        let stdin_task = child.stdin.take().map(|mut stdin| {
            let source = source.as_bytes().to_vec();
            tokio::spawn(async move {
                // The interpreter may exit without reading everything.
                if let Err(err) = stdin.write_all(&source).await {
                    debug!("sandbox stdin closed early: {err}");
                }
                drop(stdin);
            })
        });
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, self.max_output_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, self.max_output_bytes)));

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!(
                    "sandbox exceeded {}s, killing pid {:?}",
                    self.timeout.as_secs_f32(),
                    child.id()
                );
                if let Err(err) = kill_child_process_group(&mut child) {
                    debug!("failed to kill sandbox: {err}");
                }
                let reaped = child.wait().await;
                debug!("reaped timed out sandbox: {reaped:?}");
                None
            }
        };

        if let Some(task) = stdin_task {
            task.abort();
        }
        let (stdout, stdout_truncated) = drain(stdout_task).await;
        let (stderr, stderr_truncated) = drain(stderr_task).await;

        let Some(status) = status else {
            return Ok(EvaluationResult::timed_out());
        };
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        let exit_status = classify(status, &stdout, &stderr);
        debug!("sandbox exited with {status}: {exit_status:?}");

        Ok(EvaluationResult {
            stdout_text: select_output(&stdout, &stderr),
            exit_status,
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

/// SIGKILL the child's whole process group, falling back to the child alone.
#[cfg(unix)]
fn kill_child_process_group(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return child.start_kill();
    };
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_child_process_group(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Read until EOF, keeping at most `cap` bytes. Reading continues past the
/// cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

async fn drain(task: Option<JoinHandle<std::io::Result<(Vec<u8>, bool)>>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(err))) => {
            warn!("failed to read sandbox output: {err}");
            (Vec::new(), false)
        }
        Ok(Err(err)) => {
            warn!("sandbox reader task failed: {err}");
            (Vec::new(), false)
        }
        Err(_) => {
            // A grandchild still holds the pipe open.
            task.abort();
            (Vec::new(), false)
        }
    }
}

fn classify(status: ExitStatus, stdout: &str, stderr: &str) -> ExitOutcome {
    if killed_by_signal(status).is_some() {
        return ExitOutcome::Crashed;
    }
    if stdout.contains(SIGIOT_MARKER) || stderr.contains(SIGIOT_MARKER) {
        return ExitOutcome::Crashed;
    }
    if !status.success() && stdout.trim().is_empty() && stderr.trim().is_empty() {
        return ExitOutcome::Crashed;
    }
    ExitOutcome::Success
}

#[cfg(unix)]
fn killed_by_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: ExitStatus) -> Option<i32> {
    None
}

/// Pick the text worth showing from the captured streams.
pub fn select_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim_end_matches(['\n', '\r']);
    if !stdout.trim().is_empty() {
        return stdout.to_string();
    }

    let last_err = stderr
        .lines()
        .map(str::trim_end)
        .rev()
        .find(|line| !line.is_empty() && *line != "''" && !line.contains(IMPORT_SITE_NOISE));
    match last_err {
        Some("RuntimeError") => NOT_PERMITTED.to_string(),
        Some(line) => line.to_string(),
        None => NO_OUTPUT.to_string(),
    }
}
