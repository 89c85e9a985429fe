//! Prometheus metrics exporter and the counters/gauges this router emits.
//!
//! Grounded on the teacher's `metrics` + `metrics-exporter-prometheus`
//! stack; the router itself never reads these back, it only records them,
//! same split as the teacher's `metrics::start_prometheus`.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::PrometheusConfig;

/// Installs the global recorder and starts the `/metrics` HTTP listener.
/// Fatal on bind failure: a router that silently loses metrics is worse
/// than one that refuses to start.
pub fn start(config: &PrometheusConfig) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], config.port)));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

pub fn record_selection(policy: &str) {
    metrics::counter!("hiku_router_worker_selections_total", "policy" => policy.to_string())
        .increment(1);
}

pub fn record_selection_failure(policy: &str) {
    metrics::counter!("hiku_router_worker_selection_failures_total", "policy" => policy.to_string())
        .increment(1);
}

pub fn record_proxy_outcome(status: u16) {
    metrics::counter!("hiku_router_proxy_responses_total", "status" => status.to_string())
        .increment(1);
}

pub fn record_proxy_failure() {
    metrics::counter!("hiku_router_proxy_failures_total").increment(1);
}

pub fn set_pool_size(policy: &str, size: usize) {
    metrics::gauge!("hiku_router_pool_size", "policy" => policy.to_string()).set(size as f64);
}
