//! The evaluation pipeline: blacklist, sandbox, sanitize, paste, reply.

use std::path::Path;
use std::sync::Arc;

use pyval_utils_string::char_len;
use pyval_utils_string::take_bytes_at_char_boundary;
use tracing::info;
use tracing::warn;

use crate::blacklist::Blacklist;
use crate::config::Config;
use crate::config::OutputConfig;
use crate::error::PyvalErr;
use crate::error::Result;
use crate::input::InputMode;
use crate::input::parse_input;
use crate::input::require_source;
use crate::paste::CommandPasteUploader;
use crate::paste::Paste;
use crate::paste::PasteUploader;
use crate::sandbox::ExitOutcome;
use crate::sandbox::SandboxInvoker;
use crate::sanitize;

pub const PASTE_FAILED_SUFFIX: &str = " (...truncated, paste failed)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub source_code: String,
    pub requester_identity: String,
    pub raw_mode: bool,
    pub input_mode: InputMode,
    /// Bytes the reply text may take once framed for delivery. Longer output
    /// goes to a paste even when it is within the character limits.
    pub max_reply_bytes: Option<usize>,
}

impl EvaluationRequest {
    /// A request typed in chat by `nick`.
    pub fn from_chat(payload: &str, nick: &str) -> Self {
        Self {
            source_code: parse_input(payload, InputMode::Chat),
            requester_identity: nick.to_string(),
            raw_mode: false,
            input_mode: InputMode::Chat,
            max_reply_bytes: None,
        }
    }

    pub fn new(payload: &str, requester: &str, raw_mode: bool, input_mode: InputMode) -> Self {
        Self {
            source_code: parse_input(payload, input_mode),
            requester_identity: requester.to_string(),
            raw_mode,
            input_mode,
            max_reply_bytes: None,
        }
    }

    pub fn with_max_reply_bytes(mut self, max_reply_bytes: usize) -> Self {
        self.max_reply_bytes = Some(max_reply_bytes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReply {
    /// Text to send back.
    pub text: String,
    pub truncated: bool,
    pub paste_url: Option<String>,
}

/// Chat text for the outcome of [`Evaluator::evaluate`].
pub fn chat_reply(result: &Result<EvaluationReply>) -> String {
    match result {
        Ok(reply) => reply.text.clone(),
        Err(err) => err.chat_message(),
    }
}

pub struct Evaluator {
    invoker: std::result::Result<SandboxInvoker, String>,
    uploader: Option<Arc<dyn PasteUploader>>,
    output: OutputConfig,
    paste_title: String,
}

impl Evaluator {
    pub fn new(
        invoker: SandboxInvoker,
        uploader: Option<Arc<dyn PasteUploader>>,
        output: OutputConfig,
        paste_title: String,
    ) -> Self {
        Self {
            invoker: Ok(invoker),
            uploader,
            output,
            paste_title,
        }
    }

    /// Build from config. A missing sandbox or paste program is logged and
    /// only disables the affected feature.
    pub fn from_config(config: &Config, home: &Path) -> Self {
        let invoker = SandboxInvoker::from_config(&config.sandbox, home).map_err(|err| {
            warn!("evaluation disabled: {err}");
            config.sandbox.program.clone()
        });

        let uploader: Option<Arc<dyn PasteUploader>> = if config.paste.enabled {
            match CommandPasteUploader::from_config(&config.paste) {
                Ok(uploader) => Some(Arc::new(uploader)),
                Err(err) => {
                    warn!("paste uploads disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            invoker,
            uploader,
            output: config.output.clone(),
            paste_title: config.paste.title.clone(),
        }
    }

    /// Run one request end to end.
    ///
    /// A blacklist hit returns before the sandbox is started.
    pub async fn evaluate(
        &self,
        request: &EvaluationRequest,
        blacklist: &Blacklist,
    ) -> Result<EvaluationReply> {
        let source = require_source(&request.source_code)?;
        blacklist.check(source)?;

        let invoker = self
            .invoker
            .as_ref()
            .map_err(|name| PyvalErr::MissingDependency {
                name: name.clone(),
                searched: Vec::new(),
            })?;

        info!(
            "evaluating {} bytes for {}",
            source.len(),
            request.requester_identity
        );
        let result = invoker.invoke(source).await?;
        match result.exit_status {
            ExitOutcome::TimedOut => {
                return Err(PyvalErr::SandboxTimeout {
                    timeout: invoker.timeout(),
                });
            }
            ExitOutcome::Crashed => {
                return Err(PyvalErr::SandboxCrash {
                    detail: result.stdout_text,
                });
            }
            ExitOutcome::Success => {}
        }

        if request.raw_mode {
            let raw = sanitize::raw(&result.stdout_text);
            return Ok(EvaluationReply {
                text: raw.text,
                truncated: result.truncated,
                paste_url: None,
            });
        }

        let safe = sanitize::sanitize(&result.stdout_text, &self.output.inline_limits());
        let overflow = safe.truncated
            || result.truncated
            || char_len(&result.stdout_text) > self.output.inline_max_chars
            || request
                .max_reply_bytes
                .is_some_and(|max| safe.text.len() > max);
        if !overflow {
            return Ok(EvaluationReply {
                text: safe.text,
                truncated: false,
                paste_url: None,
            });
        }

        let excerpt = sanitize::excerpt(&safe.text, self.output.excerpt_chars);
        let paste = Paste::for_evaluation(
            &self.paste_title,
            &request.requester_identity,
            source,
            &sanitize::paste_output(
                &result.stdout_text,
                self.output.max_lines,
                self.output.max_line_chars,
            ),
        );
        let paste_url = self.upload(&paste).await;
        let suffix = match &paste_url {
            Some(url) => format!(" - full: {url}"),
            None => PASTE_FAILED_SUFFIX.to_string(),
        };
        let excerpt = match request.max_reply_bytes {
            Some(max) => take_bytes_at_char_boundary(excerpt, max.saturating_sub(suffix.len())),
            None => excerpt,
        };
        let text = format!("{excerpt}{suffix}");
        Ok(EvaluationReply {
            text,
            truncated: true,
            paste_url,
        })
    }

    async fn upload(&self, paste: &Paste) -> Option<String> {
        let uploader = self.uploader.as_ref()?;
        match uploader.upload(paste).await {
            Ok(url) => {
                info!("pasted output for {}: {url}", paste.author);
                Some(url)
            }
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}
