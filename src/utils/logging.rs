// src/utils/logging.rs

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "graphblaster.log";

/// Installs the global subscriber.
///
/// Console output is always on. With a `log_dir`, a JSON copy of every event
/// also goes to a daily-rolling file; the returned guard must be held until
/// exit or buffered lines are lost. Calling this twice keeps the first
/// subscriber.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Default to info if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().json().with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init();
            None
        }
    }
}
