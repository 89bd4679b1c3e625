//! Development-time tracing for the pipeline.
//!
//! Tracing is for diagnostics only. The product record of a run is the project
//! ledger (`DEVELOPMENT_LOG.md`, see [`crate::io::ledger`]), which is always
//! written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: compact format on stderr.
///
/// `RUST_LOG` wins when set. Otherwise the level is `info` with `verbose`
/// and `warn` without.
///
/// ```bash
/// RUST_LOG=forge::engine=debug forge run --project output/demo
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
