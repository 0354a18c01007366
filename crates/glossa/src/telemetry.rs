//! Process-wide logging setup.
//!
//! Library code emits `tracing` events; the database layer still uses the
//! `log` facade, whose records are forwarded into the same subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Installs the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_logging(format: LogFormat) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .finish(),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_thread_names(true)
                .finish(),
        ),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
