use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// Console output is human readable; the daily-rotated file under `log_dir`
/// is JSON. The returned guard must stay alive until exit so buffered log
/// lines are flushed.
pub fn init_logging(log_dir: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("disaster_lakehouse=info,tower_http=info"));

    // Console to stderr so `describe` output on stdout stays machine readable
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    if fs::create_dir_all(log_dir).is_err() {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "lakehouse.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    Some(guard)
}
