//! Uploading oversized results to a paste service.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::config::PasteConfig;
use crate::error::PyvalErr;
use crate::error::Result;
use crate::locate::locate_executable;

const SEPARATOR_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub title: String,
    pub author: String,
    pub content: String,
}

impl Paste {
    /// Paste for an evaluation requested by `nick`.
    pub fn for_evaluation(title: &str, nick: &str, query: &str, result: &str) -> Self {
        Self {
            title: title.to_string(),
            author: format!("PyVal (for {nick})"),
            content: paste_document(query, result),
        }
    }
}

/// Query and result under underlined headers.
pub fn paste_document(query: &str, result: &str) -> String {
    let rule = "-".repeat(SEPARATOR_WIDTH);
    format!("Query:\n{rule}\n\n{query}\n\nResult:\n{rule}\n\n{result}")
}

#[async_trait]
pub trait PasteUploader: Send + Sync {
    /// Upload `paste` and return its URL.
    async fn upload(&self, paste: &Paste) -> Result<String>;
}

/// Uploads by piping the document into an external paste CLI.
#[derive(Debug, Clone)]
pub struct CommandPasteUploader {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPasteUploader {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    /// Locate the configured paste program.
    pub fn from_config(config: &PasteConfig) -> Result<Self> {
        let program = locate_executable(&config.program)?;
        Ok(Self::new(program, config.args.clone(), config.timeout()))
    }

    fn expand_args(&self, paste: &Paste) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{title}", &paste.title)
                    .replace("{author}", &paste.author)
            })
            .collect()
    }
}

#[async_trait]
impl PasteUploader for CommandPasteUploader {
    async fn upload(&self, paste: &Paste) -> Result<String> {
        let args = self.expand_args(paste);
        debug!("uploading paste via {:?} {args:?}", self.program);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();

        // Feeding stdin counts against the timeout: a CLI that never reads
        // it would otherwise block on a full pipe.
        let upload = async move {
            if let Some(mut stdin) = stdin {
                if let Err(err) = stdin.write_all(paste.content.as_bytes()).await {
                    debug!("paste command closed stdin early: {err}");
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };
        let output = timeout(self.timeout, upload)
            .await
            .map_err(|_| {
                PyvalErr::upload(format!(
                    "paste command timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("paste command exited with {}: {}", output.status, stderr.trim());
            return Err(PyvalErr::upload(format!(
                "paste command exited with {}",
                output.status
            )));
        }
        extract_url(&stdout)
            .ok_or_else(|| PyvalErr::upload(format!("no url in paste output: {}", stdout.trim())))
    }
}

/// First whitespace-separated token that looks like an http(s) URL.
pub fn extract_url(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(str::to_string)
}
