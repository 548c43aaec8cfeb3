//! Prometheus metrics for the upload server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no per-upload labels (no ids, names or digests), only
//! aggregate counts, but the endpoint should still be network-restricted to
//! the scrapers that need it.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use parcel_core::UploadId;
use parcel_upload::SessionObserver;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_completed_total",
        "Total number of upload sessions completed with a verified digest",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_deleted_total",
        "Total number of upload sessions deleted by the caller",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_INTEGRITY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_integrity_failures_total",
        "Total number of uploads whose digest did not match the declared one",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_accepted_total",
        "Total number of chunks accepted",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_DUPLICATE: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_chunks_duplicate_total",
        "Total number of identical chunk resubmissions",
    )
    .expect("metric creation failed")
});

pub static BYTES_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_bytes_accepted_total",
        "Total payload bytes accepted (first submissions only)",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_chunk_upload_duration_seconds",
            "Time taken to admit, persist and fold a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_COMPLETE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_upload_complete_duration_seconds",
            "Time taken to verify and finalize an upload",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static ADMISSION_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_admission_rejections_total",
            "Total requests rejected by an admission limit, by scope",
        ),
        &["scope"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parcel_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Current state gauges
pub static ACTIVE_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "parcel_active_upload_sessions",
        "Current number of upload sessions holding a global admission slot",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build several routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_INTEGRITY_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_ACCEPTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_DUPLICATE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_ACCEPTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_COMPLETE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADMISSION_REJECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOAD_SESSIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

/// Helper to record an admission rejection for `scope`.
pub fn record_admission_rejection(scope: &str) {
    ADMISSION_REJECTIONS.with_label_values(&[scope]).inc();
}

/// Feeds session lifecycle events from the uploader into the counters.
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl SessionObserver for MetricsObserver {
    fn integrity_failed(&self, _upload_id: &UploadId) {
        UPLOAD_INTEGRITY_FAILURES.inc();
    }
}

/// Mirror the number of slot-holding sessions into the gauge.
pub fn set_active_sessions(open: usize) {
    ACTIVE_UPLOAD_SESSIONS.set(i64::try_from(open).unwrap_or(i64::MAX));
}
