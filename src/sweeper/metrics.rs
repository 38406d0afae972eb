//! Prometheus metrics for the relay
//!
//! Delivery outcomes are recorded by the communicator; reconcile cycles and
//! daemon health by the sweeper.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    /// Counter: link attempts by sender kind and outcome
    pub static ref LINKS_TOTAL: CounterVec = register_counter_vec!(
        "linkrelay_links_total",
        "Link attempts by sender kind and outcome",
        &["kind", "outcome"]
    )
    .expect("Failed to create links_total metric");

    /// Counter: reconcile passes by status
    pub static ref RECONCILE_CYCLES: CounterVec = register_counter_vec!(
        "linkrelay_reconcile_cycles_total",
        "Reconcile passes by status",
        &["status"]
    )
    .expect("Failed to create reconcile_cycles metric");

    /// Histogram: reconcile pass duration (seconds)
    pub static ref RECONCILE_DURATION: Histogram = register_histogram!(
        "linkrelay_reconcile_duration_seconds",
        "Duration of reconcile passes",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .expect("Failed to create reconcile_duration metric");

    /// Gauge: connections still waiting for delivery
    pub static ref UNSENT: Gauge = register_gauge!(
        "linkrelay_unsent_connections",
        "Desired connections with no confirmed delivery"
    )
    .expect("Failed to create unsent metric");

    /// Gauge: daemon health status (1 = healthy, 0 = unhealthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "linkrelay_health_status",
        "Daemon health status (1 = healthy, 0 = unhealthy)"
    )
    .expect("Failed to create health_status metric");
}

/// Count one link attempt
pub fn record_link(kind: &str, outcome: &str) {
    LINKS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Count one reconcile pass and its duration
pub fn record_reconcile(status: &str, duration_secs: f64) {
    RECONCILE_CYCLES.with_label_values(&[status]).inc();
    RECONCILE_DURATION.observe(duration_secs);
}

pub fn set_unsent(count: usize) {
    UNSENT.set(count as f64);
}

pub fn set_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        record_link("email", "success");
        record_link("sms", "failure");
        record_reconcile("success", 0.25);
        set_unsent(3);
        set_health_status(true);
    }

    #[test]
    fn test_encode_metrics() {
        record_link("email", "success");
        record_reconcile("success", 0.1);

        let output = encode_metrics();
        assert!(output.contains("linkrelay_links_total"));
        assert!(output.contains("linkrelay_reconcile_cycles_total"));
        assert!(output.contains("linkrelay_reconcile_duration_seconds"));
    }
}
