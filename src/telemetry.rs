//! Tracing setup. Logs go to stderr so they never interleave with chat lines
//! printed to stdout in terminal mode.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter from `--log-level`, then `RUST_LOG`, then [`DEFAULT_LOG_LEVEL`].
pub fn log_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(level: Option<&str>) {
    let _ = TRACING_INIT.get_or_init(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(log_filter(level))
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
