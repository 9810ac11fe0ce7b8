use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Environment variable holding the log filter, e.g. `ESEARCH_LOG=debug`.
pub const LOG_ENV: &str = "ESEARCH_LOG";

fn filter_from(directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives.unwrap_or_default())
}

/// Send diagnostics to standard error, filtered by [`LOG_ENV`].
///
/// Only warnings are shown by default. Calling this twice keeps the first
/// subscriber.
pub fn init_logging(ansi: bool) {
    let directives = std::env::var(LOG_ENV).ok();
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter_from(directives.as_deref()))
        .with_ansi(ansi)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(e) = result {
        tracing::debug!("logging already initialised: {e}");
    }
}
