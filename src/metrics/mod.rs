//! Metrics module
//!
//! Prometheus collectors for the gateway, registered once in the default
//! registry and scraped through [`server::MetricsServer`].

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Histogram, HistogramVec,
};

lazy_static! {
    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "filegate_requests_total",
        "Total HTTP requests",
        &["route", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "filegate_request_duration_seconds",
        "Request duration in seconds",
        &["route"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "filegate_uploads_total",
        "Total number of uploads",
        &["kind", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "filegate_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    // Multipart metrics
    pub static ref PARTS_UPLOADED: CounterVec = register_counter_vec!(
        "filegate_multipart_parts_uploaded_total",
        "Parts uploaded",
        &["status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "filegate_multipart_parts",
        "Number of parts per completed multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();

    // Range metrics
    pub static ref RANGE_READS: CounterVec = register_counter_vec!(
        "filegate_range_reads_total",
        "Object reads by outcome",
        &["outcome"]  // "full", "partial" or "unsatisfiable"
    ).unwrap();

    pub static ref BYTES_SERVED: Counter = register_counter!(
        "filegate_bytes_served_total",
        "Object bytes sent to clients"
    ).unwrap();

    // Auth metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "filegate_auth_attempts_total",
        "Authentication attempts",
        &["method", "status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "filegate_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a finished request
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record a stored object. `kind` is "simple" or "multipart".
pub fn record_upload_success(kind: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[kind, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(kind: &str) {
    UPLOADS_TOTAL.with_label_values(&[kind, "failure"]).inc();
}

/// Record one upload-part call
pub fn record_part_upload(success: bool) {
    let status = if success { "success" } else { "failure" };
    PARTS_UPLOADED.with_label_values(&[status]).inc();
}

/// Record a completed multipart upload
pub fn record_multipart_complete(parts_count: usize, bytes: u64) {
    MULTIPART_PARTS.observe(parts_count as f64);
    record_upload_success("multipart", bytes);
}

/// Record an object read
pub fn record_range_read(outcome: &str, bytes: u64) {
    RANGE_READS.with_label_values(&[outcome]).inc();
    BYTES_SERVED.inc_by(bytes as f64);
}

/// Record authentication attempt
pub fn record_auth_attempt(method: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[method, status]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
