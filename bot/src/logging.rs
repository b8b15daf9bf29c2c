use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;

use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// With `log_file` set, output is appended there through a non-blocking
/// writer; the returned guard must be held until exit to flush it.
pub fn init_logging(
    default_level: &str,
    log_file: Option<&Path>,
) -> std::io::Result<Option<WorkerGuard>> {
    let env_filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let Some(path) = log_file else {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_filter(env_filter());
        let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        return Ok(None);
    };

    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }
    let file = log_file_opts.open(path)?;

    let (writer, guard) = non_blocking(file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(env_filter());
    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    Ok(Some(guard))
}
