use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber: JSON lines into a daily-rolled file under
/// `log_dir`, plus stderr.
///
/// Stdout is reserved for the signal stream, so nothing is logged there. The
/// returned [`WorkerGuard`] flushes the file writer on drop and must live as
/// long as the process.
pub fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("failed to create log directory {}", logging.log_dir))?;

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        &logging.log_dir,
        &logging.file_name,
    ));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.default_filter));

    let stderr_json = logging.json_stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
    });
    let stderr_compact = (!logging.json_stderr).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false).json())
        .with(stderr_json)
        .with(stderr_compact)
        .init();

    Ok(guard)
}
