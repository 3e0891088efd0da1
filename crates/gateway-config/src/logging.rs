//! Logging initialization for the gateway.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// The log level comes from `RUST_LOG` when set, otherwise from the
/// provided default. Output goes to stderr so stdout stays clean for
/// the CLI subcommands.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
