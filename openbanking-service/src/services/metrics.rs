//! Prometheus metrics for openbanking-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by method and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_http_requests_total",
        "Total number of HTTP requests",
        &["method", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Counter for calls to the bank API by operation and outcome.
pub static UPSTREAM_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_upstream_requests_total",
        "Total number of bank API requests",
        &["operation", "outcome"]
    )
    .expect("Failed to register UPSTREAM_REQUESTS")
});

/// Histogram for bank API call duration by operation.
pub static UPSTREAM_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_upstream_request_duration_seconds",
        "Bank API request duration in seconds",
        &["operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register UPSTREAM_REQUEST_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for failed flows.
pub static FLOW_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gateway_flow_failures_total",
        "Total number of failed flows",
        &["flow"]
    )
    .expect("Failed to register FLOW_FAILURES")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&UPSTREAM_REQUESTS);
    Lazy::force(&UPSTREAM_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&FLOW_FAILURES);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, status: &str) {
    HTTP_REQUESTS.with_label_values(&[method, status]).inc();
}

pub fn record_upstream_request(operation: &str, outcome: &str) {
    UPSTREAM_REQUESTS
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_flow_failure(flow: &str) {
    FLOW_FAILURES.with_label_values(&[flow]).inc();
}
