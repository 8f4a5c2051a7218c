//! Prometheus metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

pub static VERIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "verifications_total",
        "Total verification scans by result",
        &["result"]
    )
    .expect("Failed to register verifications_total")
});

pub static VERIFICATION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "verification_duration_seconds",
        "Verification pipeline latency in seconds"
    )
    .expect("Failed to register verification_duration_seconds")
});

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"]
    )
    .expect("Failed to register db_query_duration_seconds")
});

pub static CODES_GENERATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "authentication_codes_generated_total",
        "Total authentication codes generated"
    )
    .expect("Failed to register authentication_codes_generated_total")
});

/// Touch every metric so all series exist from process start.
pub fn init_metrics() {
    Lazy::force(&VERIFICATIONS_TOTAL);
    Lazy::force(&VERIFICATION_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&CODES_GENERATED);
}

/// Render the default registry in the Prometheus text format.
pub fn get_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
