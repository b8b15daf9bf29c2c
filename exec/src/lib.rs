// - In the default output mode, it is paramount that the only thing written to
//   stdout is the evaluation result (and status lines unless `--quiet`).
// - Errors go to stderr.
#![deny(clippy::print_stdout)]

mod cli;

use std::io::IsTerminal;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
pub use cli::Cli;
use cli::MAX_PATH_ARG_LEN;
use pyval_core::Blacklist;
use pyval_core::Config;
use pyval_core::EvaluationRequest;
use pyval_core::Evaluator;
use pyval_core::InputMode;
use pyval_core::PyvalErr;
use pyval_core::SandboxInvoker;
use pyval_core::paste::CommandPasteUploader;
use pyval_core::paste::PasteUploader;
use pyval_utils_home_dir::find_pyval_home;
use tracing::debug;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const REQUESTER: &str = "pyval-exec";

/// Runs one evaluation and returns the process exit code.
pub async fn run_main(cli: Cli) -> anyhow::Result<i32> {
    let Cli {
        code,
        raw,
        blacklist: use_blacklist,
        print_blacklist,
        quiet,
        timeout,
        debug,
        config: config_path,
    } = cli;

    let default_level = if debug { "debug" } else { "error" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();

    let home = find_pyval_home().context("failed to locate the PyVal home directory")?;
    let config_path = config_path.unwrap_or_else(|| Config::default_path(&home));
    let config = Config::load(&config_path)?;

    let mut blacklist = Blacklist::from_config(&config.blacklist);
    if print_blacklist {
        print_out(&blacklist.describe());
        return Ok(0);
    }
    blacklist.set_enabled(use_blacklist);

    let status = |msg: &str| {
        if !quiet {
            print_out(msg);
        }
    };

    let text = match code {
        Some(code) => code,
        None => {
            if std::io::stdin().is_terminal() && !quiet {
                eprintln!("Reading from stdin, use EOF to run (Ctrl + D).");
            }
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read code from stdin")?;
            buf
        }
    };

    let (text, mode) = if text.len() < MAX_PATH_ARG_LEN && Path::new(&text).is_file() {
        let contents = std::fs::read_to_string(&text)
            .with_context(|| format!("error reading from file: {text}"))?;
        status(&format!("Loaded contents from file: {text}\n"));
        (contents, InputMode::Verbatim)
    } else {
        status(&format!("Content: {}\n", preview(&text)));
        (text, InputMode::Chat)
    };

    let mut invoker = SandboxInvoker::from_config(&config.sandbox, &home)?;
    if let Some(secs) = timeout {
        invoker = invoker.with_timeout(Duration::from_secs(secs));
    }
    let uploader: Option<Arc<dyn PasteUploader>> = if config.paste.enabled && !raw {
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
    let evaluator = Evaluator::new(
        invoker,
        uploader,
        config.output.clone(),
        config.paste.title.clone(),
    );

    let request = EvaluationRequest::new(&text, REQUESTER, raw, mode);
    debug!("evaluating: {:?}", request.source_code);
    match evaluator.evaluate(&request, &blacklist).await {
        Ok(reply) => {
            let method = if raw { "raw output" } else { "safe output" };
            status(&format!("Results ({method}):"));
            print_out(&reply.text);
            Ok(0)
        }
        Err(PyvalErr::SandboxTimeout { timeout }) => {
            eprintln!("Operation timed out. ({}s)", timeout.as_secs());
            Ok(1)
        }
        Err(err) => {
            eprintln!("Execution Error:\n{}", err.chat_message());
            Ok(1)
        }
    }
}

/// First line, plus a count of the rest.
fn preview(text: &str) -> String {
    let mut lines = text.split('\n');
    let first = lines.next().unwrap_or_default();
    match lines.count() {
        0 => first.to_string(),
        1 => format!("{first} ...plus 1 more line."),
        more => format!("{first} ...plus {more} more lines."),
    }
}

#[allow(clippy::print_stdout)]
fn print_out(text: &str) {
    println!("{text}");
}
