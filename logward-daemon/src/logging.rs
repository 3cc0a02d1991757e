//! Tracing setup for logward-daemon.
//!
//! The `[general]` config section picks the base level and the output
//! format; a `RUST_LOG` environment filter, when present, wins over the
//! configured level so operators can raise verbosity without editing
//! the config file.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use logward_core::config::GeneralConfig;

/// Install the process-wide tracing subscriber.
///
/// Call once, before any tracing macros run. Config validation admits
/// `"json"` (production default) and `"pretty"` (development) as
/// formats, so anything else here falls back to JSON.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("bad log level '{}'", config.log_level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format.as_str() {
        "pretty" => builder.pretty().try_init(),
        _ => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))
}
