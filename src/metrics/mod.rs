//! Metrics module
//!
//! Prometheus collectors for uploads, downloads and face detection.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "facemask_uploads_total",
        "Total number of uploads by outcome",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "facemask_upload_bytes_total",
        "Total bytes accepted for storage"
    ).unwrap();

    // Download metrics
    pub static ref DOWNLOADS_TOTAL: CounterVec = register_counter_vec!(
        "facemask_downloads_total",
        "Total download attempts by outcome",
        &["status"]  // "served" or "not_found"
    ).unwrap();

    // Detection metrics
    pub static ref FACES_DETECTED_TOTAL: CounterVec = register_counter_vec!(
        "facemask_faces_detected_total",
        "Regions detected and blurred, by classifier model",
        &["model"]
    ).unwrap();

    pub static ref ANONYMIZE_DURATION: Histogram = register_histogram!(
        "facemask_anonymize_duration_seconds",
        "Time spent detecting and blurring one image",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "facemask_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record an upload outcome; `status` is the transfer status label
pub fn record_upload(status: &str) {
    UPLOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Record bytes persisted by a successful upload
pub fn record_upload_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a download attempt
pub fn record_download(served: bool) {
    let status = if served { "served" } else { "not_found" };
    DOWNLOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Record regions found by one model pass
pub fn record_faces_detected(model: &str, count: usize) {
    FACES_DETECTED_TOTAL
        .with_label_values(&[model])
        .inc_by(count as f64);
}

/// Record anonymization duration
pub fn record_anonymize_duration(duration_secs: f64) {
    ANONYMIZE_DURATION.observe(duration_secs);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
