//! Prometheus metrics for feed-service.
//!
//! Collectors register on the default registry; `/metrics` renders it.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Duration;

static FANOUT_BATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_fanout_batches_total",
        "Fanout batches processed (success/error)",
        &["outcome"]
    )
    .expect("Failed to register fanout batches metric")
});

static FEED_ENTRIES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_entries_created_total",
        "Feed entries newly written to the store"
    )
    .expect("Failed to register feed entries created metric")
});

static FANOUT_CONFLICTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "feed_fanout_conflicts_total",
        "Feed entries skipped because they already existed"
    )
    .expect("Failed to register fanout conflicts metric")
});

static CACHE_MIRROR_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_cache_mirror_failures_total",
        "Cache pushes or invalidations swallowed after a store write",
        &["list"]
    )
    .expect("Failed to register cache mirror failures metric")
});

static PAGE_SOURCE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_page_source_total",
        "Pages served by source (cache/store/cache_error)",
        &["list", "source"]
    )
    .expect("Failed to register page source metric")
});

static FANOUT_JOB_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fanout_job_retries_total",
        "Fanout jobs re-enqueued after a failure or timeout",
        &["kind", "reason"]
    )
    .expect("Failed to register fanout job retries metric")
});

static FANOUT_JOBS_DEAD_LETTERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fanout_jobs_dead_lettered_total",
        "Fanout jobs abandoned after the last attempt",
        &["kind"]
    )
    .expect("Failed to register dead-lettered jobs metric")
});

static FANOUT_JOBS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "fanout_jobs_in_flight",
        "Fanout jobs queued, running or waiting for a retry"
    )
    .expect("Failed to register fanout in-flight metric")
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_http_requests_total",
        "HTTP requests by method, route and status",
        &["method", "path", "status"]
    )
    .expect("Failed to register http requests metric")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "feed_http_request_duration_seconds",
        "HTTP request latency by method and route",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http latency metric")
});

pub fn record_fanout_batch(outcome: &str) {
    FANOUT_BATCHES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_entries_created(count: usize) {
    FEED_ENTRIES_CREATED_TOTAL.inc_by(count as u64);
}

pub fn record_conflicts(count: usize) {
    FANOUT_CONFLICTS_TOTAL.inc_by(count as u64);
}

pub fn record_mirror_failure(list: &str) {
    CACHE_MIRROR_FAILURES_TOTAL.with_label_values(&[list]).inc();
}

pub fn record_page_source(list: &str, source: &str) {
    PAGE_SOURCE_TOTAL.with_label_values(&[list, source]).inc();
}

pub fn record_job_retry(kind: &str, reason: &str) {
    FANOUT_JOB_RETRIES_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn record_dead_letter(kind: &str) {
    FANOUT_JOBS_DEAD_LETTERED_TOTAL
        .with_label_values(&[kind])
        .inc();
}

pub fn set_jobs_in_flight(count: usize) {
    FANOUT_JOBS_IN_FLIGHT.set(count as i64);
}

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(elapsed.as_secs_f64());
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
