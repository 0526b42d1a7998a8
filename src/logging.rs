//! File-based logging for the demuxer
//!
//! The host owns stdout (the demo binary may stream PCM there), so logs go
//! to a rotating file.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_DIR: &str = ".logs";
const LOG_FILE_PREFIX: &str = "spotify-demux";
const DEFAULT_FILTER: &str = "spotify_demux=debug,librespot=info,warn";

/// Initialize the logging system.
///
/// Logs are written to `.logs/spotify-demux.YYYY-MM-DD` with daily rotation.
/// The log level can be controlled via the `RUST_LOG` environment variable.
///
/// Default log levels:
/// - `spotify_demux` modules: DEBUG
/// - `librespot`: INFO
/// - Other crates: WARN
///
/// A host that already installed a subscriber keeps it.
pub fn init_logging() -> anyhow::Result<()> {
    let log_dir = Path::new(LOG_DIR);
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        return Ok(());
    }

    // Flushes on drop; must live as long as the process
    Box::leak(Box::new(guard));

    tracing::info!("Logging initialized - logs written to {}/", LOG_DIR);
    Ok(())
}

/// Log a call into the provider SDK
#[macro_export]
macro_rules! provider_call {
    ($call:expr) => {
        ::tracing::debug!(call = $call, "> provider call")
    };
    ($call:expr, $($field:tt)*) => {
        ::tracing::debug!(call = $call, $($field)*, "> provider call")
    };
}
