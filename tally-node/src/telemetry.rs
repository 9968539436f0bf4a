use tracing_subscriber::{filter, fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,tally_consensus=debug";

/// Installs the global subscriber: regular logs filtered by `RUST_LOG`
/// (falling back to [`DEFAULT_FILTER`]), and the `consensus` audit events
/// on their own layer without ANSI colouring.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let audit_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter::filter_fn(|metadata| metadata.target() == "consensus"));

    let stdout_layer = fmt::layer()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with_filter(filter::filter_fn(|metadata| metadata.target() != "consensus"));

    tracing_subscriber::registry().with(audit_layer).with(stdout_layer).try_init().is_ok()
}
