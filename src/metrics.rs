//! Process-wide Prometheus metrics, exposed on the `axum` router's
//! `/metrics` route alongside `/rpc`, `/eth` and `/health`.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "transfers_total",
        "Total number of processed transfers",
        &["direction", "status"]
    )
    .unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "errors_total",
        "Total number of errors by originating component",
        &["component"]
    )
    .unwrap();

    pub static ref RECONCILE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "reconcile_duration_seconds",
        "Wall-clock time to complete a reconciliation cycle",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    pub static ref LEDGER_STREAM_RECONNECTS_TOTAL: CounterVec = register_counter_vec!(
        "ledger_stream_reconnects_total",
        "Total number of updates-stream reconnect attempts",
        &["reason"]
    )
    .unwrap();

    pub static ref READINESS: GaugeVec = register_gauge_vec!(
        "readiness",
        "Whether a bridge side has caught up to its source's head (1) or not (0)",
        &["side"]
    )
    .unwrap();
}

/// Renders the current metric snapshot in the Prometheus text exposition
/// format, for the router's `/metrics` handler.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("prometheus text encoding is infallible for well-formed metrics");
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_transfer(direction: &str, status: &str) {
    TRANSFERS_TOTAL.with_label_values(&[direction, status]).inc();
}

pub fn record_error(component: &str) {
    ERRORS_TOTAL.with_label_values(&[component]).inc();
}

pub fn record_reconcile_duration(outcome: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS.with_label_values(&[outcome]).observe(seconds);
}

pub fn record_stream_reconnect(reason: &str) {
    LEDGER_STREAM_RECONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_readiness(side: &str, ready: bool) {
    READINESS.with_label_values(&[side]).set(if ready { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metric_names() {
        record_transfer("ledger_to_ethereum", "completed");
        let text = render();
        assert!(text.contains("transfers_total"));
    }
}
