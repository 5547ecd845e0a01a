//! Prometheus metrics for the sunset service.
//!
//! Scheduling and erasure failures never reach end users; these counters and
//! the logs are how operators see them.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated. Metrics carry no user ids or
//! email addresses, but the ops listener should still be network-restricted
//! to the Prometheus scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Lifecycle transitions
pub static DELETIONS_REQUESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_deletions_requested_total",
        "Total account deletions requested",
    )
    .expect("metric creation failed")
});

pub static DELETIONS_RECOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_deletions_recovered_total",
        "Total accounts recovered during the grace period",
    )
    .expect("metric creation failed")
});

pub static DELETIONS_ADMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_deletions_admitted_total",
        "Total deletion records admitted to a hard-deletion day",
    )
    .expect("metric creation failed")
});

pub static DELETIONS_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_deletions_executed_total",
        "Total accounts permanently erased",
    )
    .expect("metric creation failed")
});

// Scheduler and executor health
pub static ADMISSION_DAYS_FULL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_admission_full_days_total",
        "Admission attempts that found the probed day at capacity",
    )
    .expect("metric creation failed")
});

pub static ADMISSION_DEFERRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_admission_deferred_total",
        "Records deferred because every probed day was full",
    )
    .expect("metric creation failed")
});

pub static ERASURE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sunset_erasure_failures_total",
        "Hard deletions that failed and were left scheduled for retry",
    )
    .expect("metric creation failed")
});

pub static TICK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sunset_tick_duration_seconds",
            "Duration of periodic job ticks by job",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job"],
    )
    .expect("metric creation failed")
});

// Event bus
pub static EVENTS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("sunset_events_published_total", "Events published by subject"),
        &["subject"],
    )
    .expect("metric creation failed")
});

pub static EVENT_PUBLISH_RETRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sunset_event_publish_retries_total",
            "Publish attempts after the first, by subject",
        ),
        &["subject"],
    )
    .expect("metric creation failed")
});

pub static EVENT_PUBLISH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sunset_event_publish_failures_total",
            "Publishes that exhausted their retries, by subject",
        ),
        &["subject"],
    )
    .expect("metric creation failed")
});

pub static EVENT_HANDLER_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sunset_event_handler_failures_total",
            "Handler invocations that failed, by subject",
        ),
        &["subject"],
    )
    .expect("metric creation failed")
});

// Notifications
pub static NOTIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sunset_notifications_total",
            "Notification outcomes by template and outcome",
        ),
        &["template", "outcome"],
    )
    .expect("metric creation failed")
});

pub static HOUSEKEEPING_PURGED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sunset_housekeeping_purged_total",
            "Expired rows purged by housekeeping, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static ADMISSION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sunset_admission_duration_seconds",
            "Time taken to admit one deletion record",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; tests and the binary may both call it.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(DELETIONS_REQUESTED.clone()),
            Box::new(DELETIONS_RECOVERED.clone()),
            Box::new(DELETIONS_ADMITTED.clone()),
            Box::new(DELETIONS_EXECUTED.clone()),
            Box::new(ADMISSION_DAYS_FULL.clone()),
            Box::new(ADMISSION_DEFERRED.clone()),
            Box::new(ERASURE_FAILURES.clone()),
            Box::new(TICK_DURATION.clone()),
            Box::new(EVENTS_PUBLISHED.clone()),
            Box::new(EVENT_PUBLISH_RETRIES.clone()),
            Box::new(EVENT_PUBLISH_FAILURES.clone()),
            Box::new(EVENT_HANDLER_FAILURES.clone()),
            Box::new(NOTIFICATIONS.clone()),
            Box::new(HOUSEKEEPING_PURGED.clone()),
            Box::new(ADMISSION_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
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

/// Record a notification outcome ("sent", "rate_limited", "failed").
pub fn record_notification(template: &str, outcome: &str) {
    NOTIFICATIONS.with_label_values(&[template, outcome]).inc();
}
