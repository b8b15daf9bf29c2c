//! Entry-point for the `pyval-exec` binary.
//!
//! Evaluates one snippet (argument, file or stdin) through the same pipeline
//! the bot uses and prints the result.
use clap::Parser;
use pyval_exec::Cli;
use pyval_exec::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let code = run_main(cli).await?;
    std::process::exit(code);
}
