//! Restart a running `pyval-bot` using its pid file.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pyval_bot::init_logging;
use pyval_bot::restart::restart;
use pyval_core::config::PID_FILENAME;
use pyval_utils_home_dir::find_pyval_home;

#[derive(Parser, Debug)]
#[command(version, about = "Restart a running PyVal bot.")]
struct Cli {
    /// Pid file written by the bot. Defaults to `$PYVAL_HOME/pyval.pid`.
    #[arg(long = "pidfile", value_name = "FILE")]
    pid_file: Option<PathBuf>,

    /// Seconds to wait for the old process to exit.
    #[arg(long, short = 'w', default_value_t = 10)]
    wait: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = init_logging("warn", None);

    let pid_file = match cli.pid_file {
        Some(path) => path,
        None => find_pyval_home()
            .context("failed to locate the PyVal home directory")?
            .join(PID_FILENAME),
    };

    match restart(&pid_file, Duration::from_secs(cli.wait)).await {
        Ok((old, new_pid)) => {
            println!("restarted {}: pid {} -> {new_pid}", old.argv.join(" "), old.pid);
            Ok(())
        }
        Err(err) => {
            eprintln!("unable to restart PyVal: {err}");
            std::process::exit(1);
        }
    }
}
