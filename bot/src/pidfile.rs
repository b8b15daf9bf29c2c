use std::io;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

/// The running bot's pid, written at startup and removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let pid = std::process::id();
        std::fs::write(path, format!("{pid}\n"))?;
        debug!("wrote pid {pid} to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!("failed to remove pid file {}: {err}", self.path.display());
        }
    }
}
