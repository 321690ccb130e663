//! Tracing setup for the CLI.
//!
//! Output goes to stderr in compact format so stdout stays free for command
//! output (`graph`, state JSON).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (the configured
/// `log_level`) is used, falling back to `info` if it does not parse.
///
/// # Example
/// ```bash
/// RUST_LOG=srag_report=debug srag-report run
/// ```
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
