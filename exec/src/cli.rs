use clap::Parser;
use std::path::PathBuf;

/// Files at least this long are never treated as a path.
pub const MAX_PATH_ARG_LEN: usize = 256;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Evaluate python code in the PyVal sandbox.")]
pub struct Cli {
    /// Code to evaluate, or a file to read code from. stdin is used when not
    /// given.
    #[arg(value_name = "CODE")]
    pub code: Option<String>,

    /// Show unsafe, raw output.
    #[arg(long, short = 'r', default_value_t = false)]
    pub raw: bool,

    /// Reject code containing blacklisted strings.
    #[arg(long, short = 'b', default_value_t = false)]
    pub blacklist: bool,

    /// Print the blacklisted strings and exit.
    #[arg(
        long = "print-blacklist",
        alias = "printblacklist",
        short = 'p',
        default_value_t = false
    )]
    pub print_blacklist: bool,

    /// Print output only.
    #[arg(long, short = 'q', default_value_t = false)]
    pub quiet: bool,

    /// Timeout for code execution, in seconds.
    #[arg(long, short = 't', value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Log what happens before, during and after execution.
    #[arg(long, short = 'd', default_value_t = false)]
    pub debug: bool,

    /// Config file to use instead of `$PYVAL_HOME/pyval.toml`.
    #[arg(long = "config", short = 'f', value_name = "FILE")]
    pub config: Option<PathBuf>,
}
