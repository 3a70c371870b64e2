//! Diagnostic tracing for the agent.
//!
//! Every pipeline stage logs through `tracing`; this installs the subscriber.
//! Output goes to stderr so `--json` reports on stdout stay machine-readable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `info` with `verbose`
/// and `warn` without.
///
/// ```bash
/// RUST_LOG=mikalia_agent=debug mikalia-agent run --task "..."
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
