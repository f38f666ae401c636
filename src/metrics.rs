//! In-process Prometheus registry for the acquisition engine.
//!
//! Exposition is out of scope; consumers read these through the default
//! registry or the `PrometheusSink` in `monitor`.

use prometheus::{Gauge, Histogram, IntCounter, IntCounterVec, Opts};
use std::env;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "appharvest".to_string());

    // === Request metrics ===

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of storefront requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_RETRIES_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("request_retries_total", "Total request retry attempts")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACQUISITION_ERRORS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("acquisition_errors_total", "Exhausted requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    // === Batch metrics ===

    pub static ref BATCHES_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("batches_total", "Completed batches by stage")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["stage"]
        ).unwrap();

    pub static ref BATCH_REQUESTS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("batch_requests_total", "Requests dispatched per stage")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["stage"]
        ).unwrap();

    pub static ref BATCH_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "batch_duration_seconds",
                "Batch wall duration in seconds"
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref BATCH_LATENCY_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "batch_latency_seconds",
                "Average per-request latency per batch in seconds"
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref BATCH_SPEEDUP: Gauge =
        Gauge::with_opts(
            Opts::new("batch_speedup", "Summed latency over wall duration of the last batch")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Controller metrics ===

    pub static ref SESSION_CONTROL_RATE: Gauge =
        Gauge::with_opts(
            Opts::new("session_control_rate", "Request rate emitted by the controller")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SESSION_CONTROL_CONCURRENCY: Gauge =
        Gauge::with_opts(
            Opts::new("session_control_concurrency", "Concurrency emitted by the controller")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SESSION_CONTROL_DELAY: Gauge =
        Gauge::with_opts(
            Opts::new("session_control_delay_seconds", "Inter-batch delay emitted by the controller")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SESSION_RESETS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("session_resets_total", "HTTP session rebuilds")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers every metric with the default registry. Call once at startup;
/// a second call fails with a duplicate-registration error.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_RETRIES_TOTAL.clone()))?;
    registry.register(Box::new(ACQUISITION_ERRORS_TOTAL.clone()))?;
    registry.register(Box::new(BATCHES_TOTAL.clone()))?;
    registry.register(Box::new(BATCH_REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(BATCH_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(BATCH_LATENCY_SECONDS.clone()))?;
    registry.register(Box::new(BATCH_SPEEDUP.clone()))?;
    registry.register(Box::new(SESSION_CONTROL_RATE.clone()))?;
    registry.register(Box::new(SESSION_CONTROL_CONCURRENCY.clone()))?;
    registry.register(Box::new(SESSION_CONTROL_DELAY.clone()))?;
    registry.register(Box::new(SESSION_RESETS_TOTAL.clone()))?;
    Ok(())
}

/// Static label for common status codes, avoiding a heap allocation per
/// request on the hot path. Uncommon codes collapse to "other".
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        408 => "408",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}
