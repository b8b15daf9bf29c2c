//! Restart a running bot from its pid file: capture its command line and
//! working directory, interrupt it, wait for it to exit, launch it again.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;
use tracing::info;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum RestartError {
    #[error("no pid file found: {}", .0.display())]
    MissingPidFile(PathBuf),

    #[error("pid file is empty: {}", .0.display())]
    EmptyPidFile(PathBuf),

    #[error("invalid pid in {}: {contents:?}", .path.display())]
    InvalidPid { path: PathBuf, contents: String },

    #[error("process {0} is not running")]
    NotRunning(u32),

    #[error("no command line available for process {0}")]
    NoCommandLine(u32),

    #[error("process {pid} still running after {}s", .waited.as_secs())]
    StillRunning { pid: u32, waited: Duration },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What is needed to launch a process again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

impl ProcessSnapshot {
    /// Read `/proc/<pid>/cmdline` and `/proc/<pid>/cwd`.
    pub fn capture(pid: u32) -> Result<Self, RestartError> {
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));
        let cmdline = match std::fs::read(proc_dir.join("cmdline")) {
            Ok(cmdline) => cmdline,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RestartError::NotRunning(pid));
            }
            Err(err) => return Err(err.into()),
        };
        let argv: Vec<String> = cmdline
            .split(|byte| *byte == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        if argv.is_empty() {
            return Err(RestartError::NoCommandLine(pid));
        }
        let cwd = std::fs::read_link(proc_dir.join("cwd"))?;
        Ok(Self { pid, argv, cwd })
    }

    /// Start the captured command again, detached from this process' stdio.
    pub fn relaunch(&self) -> io::Result<u32> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;
        let child = std::process::Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child.id())
    }
}

pub fn read_pid_file(path: &Path) -> Result<u32, RestartError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(RestartError::MissingPidFile(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(RestartError::EmptyPidFile(path.to_path_buf()));
    }
    trimmed
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid != 0)
        .ok_or_else(|| RestartError::InvalidPid {
            path: path.to_path_buf(),
            contents: trimmed.to_string(),
        })
}

pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let status = unsafe { libc::kill(pid, 0) };
    if status == 0 {
        return true;
    }
    let err = io::Error::last_os_error();
    !matches!(err.raw_os_error(), Some(libc::ESRCH))
}

fn interrupt(pid: u32) -> Result<(), RestartError> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| RestartError::NotRunning(pid))?;
    if unsafe { libc::kill(raw, libc::SIGINT) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(RestartError::NotRunning(pid));
        }
        return Err(err.into());
    }
    Ok(())
}

async fn wait_for_exit(pid: u32, wait: Duration) -> Result<(), RestartError> {
    let started = Instant::now();
    while is_pid_alive(pid) {
        if started.elapsed() >= wait {
            return Err(RestartError::StillRunning { pid, waited: wait });
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    Ok(())
}

/// Restart the process named by `pid_file`; returns the snapshot of the old
/// process and the new pid. Nothing is signalled when the pid file is missing
/// or unusable.
pub async fn restart(
    pid_file: &Path,
    wait: Duration,
) -> Result<(ProcessSnapshot, u32), RestartError> {
    let pid = read_pid_file(pid_file)?;
    if !is_pid_alive(pid) {
        return Err(RestartError::NotRunning(pid));
    }
    let snapshot = ProcessSnapshot::capture(pid)?;
    debug!(
        "captured pid {pid}: {:?} in {}",
        snapshot.argv,
        snapshot.cwd.display()
    );

    info!("sending SIGINT to {pid}");
    interrupt(pid)?;
    wait_for_exit(pid, wait).await?;

    let new_pid = snapshot.relaunch()?;
    info!("relaunched as {new_pid}");
    Ok((snapshot, new_pid))
}
