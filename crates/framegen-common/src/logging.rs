use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "FRAMEGEN_LOG";

/// Initialize structured logging with environment filter.
/// Set FRAMEGEN_LOG=debug (or trace, info, warn, error) for verbosity control.
///
/// `fallback` is used when the variable is unset. Output goes to stderr so the
/// host application's stdout stays untouched, and a subscriber the host already
/// installed is left in place.
pub fn init_logging(fallback: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(fallback.unwrap_or("warn")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
