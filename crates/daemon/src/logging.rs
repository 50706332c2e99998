// Logging setup: tracing-subscriber registry, optional rolling file output

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "workq=info";
const LOG_FILE_PREFIX: &str = "workqd.log";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the filter, `WORKQ_LOG_FORMAT=json` switches stdout to
/// JSON, and `WORKQ_LOG_DIR` adds a daily-rolling JSON file. Keep the returned
/// guard alive for the life of the process or buffered file lines are lost.
pub fn init_logging() -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match std::env::var("WORKQ_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match std::env::var("WORKQ_LOG_FORMAT").as_deref() {
        // Production: JSON structured logging
        Ok("json") => registry.with(fmt::layer().json()).init(),
        // Development: Pretty formatting with colors
        _ => registry.with(fmt::layer().pretty()).init(),
    }

    guard
}
