use metrics::{register_counter, register_histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::ScoutError;

/// Pipeline counters.
///
/// The handles are no-ops until a recorder is installed; the plain atomics
/// mirror the most useful ones so `stats()` works either way.
pub struct Metrics {
    pub candidates_generated: Counter,
    pub collisions: Counter,
    pub resolutions_found: Counter,
    pub resolutions_empty: Counter,
    pub validations_failed: Counter,
    pub announcements: Counter,
    pub delivery_failures: Counter,
    pub loop_backoffs: Counter,
    pub resolve_duration: Histogram,
    generated: AtomicU64,
    announced: AtomicU64,
    backoffs: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            candidates_generated: register_counter!("scout_candidates_generated_total"),
            collisions: register_counter!("scout_candidate_collisions_total"),
            resolutions_found: register_counter!("scout_resolutions_found_total"),
            resolutions_empty: register_counter!("scout_resolutions_empty_total"),
            validations_failed: register_counter!("scout_validations_failed_total"),
            announcements: register_counter!("scout_announcements_total"),
            delivery_failures: register_counter!("scout_delivery_failures_total"),
            loop_backoffs: register_counter!("scout_loop_backoffs_total"),
            resolve_duration: register_histogram!("scout_resolve_duration_seconds"),
            generated: AtomicU64::new(0),
            announced: AtomicU64::new(0),
            backoffs: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_candidate(&self) {
        self.candidates_generated.increment(1);
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collisions(&self, count: u64) {
        if count > 0 {
            self.collisions.increment(count);
        }
    }

    pub fn record_resolution(&self, duration: Duration, found: bool) {
        if found {
            self.resolutions_found.increment(1);
        } else {
            self.resolutions_empty.increment(1);
        }
        self.resolve_duration.record(duration.as_secs_f64());
    }

    pub fn record_validation_failure(&self) {
        self.validations_failed.increment(1);
    }

    pub fn record_announcement(&self) {
        self.announcements.increment(1);
        self.announced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.increment(1);
    }

    pub fn record_backoff(&self) {
        self.loop_backoffs.increment(1);
        self.backoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            candidates_generated: self.generated.load(Ordering::Relaxed),
            announcements: self.announced.load(Ordering::Relaxed),
            loop_backoffs: self.backoffs.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub candidates_generated: u64,
    pub announcements: u64,
    pub loop_backoffs: u64,
    pub uptime: Duration,
}

/// Install the global Prometheus recorder. Call once, before [`Metrics::new`].
pub fn install_prometheus() -> Result<PrometheusHandle, ScoutError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ScoutError::Configuration(format!("metrics recorder: {e}")))
}
