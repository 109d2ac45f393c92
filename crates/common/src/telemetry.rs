//! Tracing initialization shared by the gateway and game binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Honors `RUST_LOG` if set;
/// otherwise falls back to `debug` (when `debug_fallback`) or `info`.
pub fn init_tracing(debug_fallback: bool) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug_fallback { "debug" } else { "info" })
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()?;

    Ok(())
}

/// A bare-bones variant for short-lived tools and tests that don't want
/// the full registry/layer composition.
pub fn init_tracing_simple(debug_fallback: bool) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug_fallback { "debug" } else { "info" })
    });

    fmt().with_env_filter(filter).try_init()?;

    Ok(())
}
