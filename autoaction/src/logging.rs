//! Diagnostics for engine decisions.
//!
//! Resolution, enqueue, dedupe, descriptors skipped for unresolved arguments
//! and handler failures are emitted as `tracing` events on stderr. The replay
//! report on stdout never depends on `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber: `RUST_LOG` filter, compact stderr output.
///
/// Call once, at process start. A second call panics.
///
/// ```bash
/// RUST_LOG=autoaction::engine=debug cargo run -- replay autoaction/scenarios/load_by_id.toml
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
