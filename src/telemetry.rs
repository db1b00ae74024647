use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber at `log_level`.
///
/// Accepts anything `EnvFilter` parses, e.g. "info" or
/// "peerping=debug,axum=warn".
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
}
