#![deny(clippy::print_stdout, clippy::print_stderr)]

mod backoff;
mod cli;
mod client;
pub mod irc;
mod logging;
mod pidfile;
pub mod restart;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
pub use backoff::Backoff;
pub use cli::Cli;
pub use client::Credentials;
pub use client::IrcClient;
pub use logging::init_logging;
pub use pidfile::PidFile;
use pyval_core::BotState;
use pyval_core::CommandHandler;
use pyval_core::Config;
use pyval_core::Evaluator;
use pyval_core::config::LOG_FILENAME;
use pyval_core::config::PID_FILENAME;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

/// Run the bot until SIGINT/SIGTERM or an admin `shutdown`.
pub async fn run_main(
    config: Config,
    home: PathBuf,
    credentials: Credentials,
    debug: bool,
) -> anyhow::Result<()> {
    let log_path = config.irc.logfile.then(|| home.join(LOG_FILENAME));
    let default_level = if debug { "debug" } else { "info" };
    let _log_guard = init_logging(default_level, log_path.as_deref())
        .context("failed to open the log file")?;

    info!("starting PyVal {}", env!("CARGO_PKG_VERSION"));
    let pid_path = home.join(PID_FILENAME);
    let _pid_file = PidFile::create(&pid_path)
        .with_context(|| format!("failed to write {}", pid_path.display()))?;

    let state = BotState::load(&config, &home)?;
    let evaluator = Evaluator::from_config(&config, &home);
    let handler = CommandHandler::new(Arc::new(Mutex::new(state)), Arc::new(evaluator));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_signal().await {
                Ok(name) => info!("received {name}, shutting down"),
                Err(err) => {
                    warn!("unable to listen for signals: {err}");
                    return;
                }
            }
            shutdown.cancel();
        }
    });

    let client = IrcClient::new(config.irc, credentials, handler);
    client.run(shutdown).await?;
    info!("PyVal stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
