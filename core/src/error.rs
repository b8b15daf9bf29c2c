use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PyvalErr>;

#[derive(Error, Debug)]
pub enum PyvalErr {
    /// The payload contained a blacklisted substring. The message is the
    /// refusal shown to the requester.
    #[error("{message}")]
    BlacklistRejection { pattern: String, message: String },

    /// The sandboxed interpreter died (signal, SIGIOT report, or a non-zero
    /// exit without any diagnostic).
    #[error("sandbox crashed: {detail}")]
    SandboxCrash { detail: String },

    /// The sandboxed interpreter exceeded its wall-clock budget and was killed.
    #[error("sandbox timed out after {}s", .timeout.as_secs_f32())]
    SandboxTimeout { timeout: Duration },

    /// The paste collaborator could not produce a URL.
    #[error("paste upload failed: {0}")]
    UploadFailure(String),

    /// An external executable this feature depends on could not be found.
    #[error("{name} not found (looked in: {})", display_paths(.searched))]
    MissingDependency { name: String, searched: Vec<PathBuf> },

    /// Empty or whitespace-only source.
    #[error("{0}")]
    EmptyInput(&'static str),

    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PyvalErr {
    pub fn upload(message: impl Into<String>) -> Self {
        Self::UploadFailure(message.into())
    }

    /// Text shown in chat for a failed request. None of these variants ever
    /// reach the connection loop.
    pub fn chat_message(&self) -> String {
        match self {
            PyvalErr::BlacklistRejection { message, .. } => format!("error: {message}"),
            PyvalErr::SandboxCrash { .. } => "crash! the interpreter choked.".to_string(),
            PyvalErr::SandboxTimeout { .. } => "result: timed out.".to_string(),
            PyvalErr::EmptyInput(message) => format!("error: {message}"),
            PyvalErr::MissingDependency { name, .. } => {
                format!("evaluation unavailable: {name} is not installed.")
            }
            other => format!("PyVal Error: {other}"),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
