//! Logging setup for the `dkm` binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with a default filter, overridable through `RUST_LOG`.
///
/// Logs go to stderr so that `dkm local` can keep stdout for its response.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}
