//! Prometheus scrape endpoint.
//!
//! `metrics-exporter-prometheus` ships its own HTTP listener, so the
//! daemon only installs the global recorder and registers the metric
//! descriptions from `logward_core::metrics`.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

use logward_core::config::MetricsConfig;

/// Install the global recorder and start serving scrapes.
///
/// Call once at startup, before any metric macros run; a second call
/// fails because the recorder is process-global.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    anyhow::ensure!(
        config.endpoint == "/metrics",
        "metrics endpoint is fixed at /metrics (got '{}')",
        config.endpoint
    );

    let ip: IpAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("bad metrics listen_addr '{}'", config.listen_addr))?;
    let addr = SocketAddr::new(ip, config.port);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus recorder")?;

    logward_core::metrics::describe_all();
    tracing::info!(%addr, "serving Prometheus metrics");
    Ok(())
}
