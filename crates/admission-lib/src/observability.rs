//! Observability for the admission path
//!
//! Provides:
//! - Prometheus counters and latency histograms, registered once per process
//! - Structured logging of admission decisions with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Buckets for admission latency, in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

static GLOBAL_METRICS: OnceLock<AdmissionMetricsInner> = OnceLock::new();

struct AdmissionMetricsInner {
    requests: IntCounterVec,
    failures: IntCounterVec,
    matched: IntCounter,
    edits: IntCounter,
    latency_seconds: HistogramVec,
}

impl AdmissionMetricsInner {
    fn new() -> Self {
        Self {
            requests: register_int_counter_vec!(
                "vpa_admission_requests_total",
                "Admission reviews received, by resource",
                &["resource"]
            )
            .expect("Failed to register vpa_admission_requests_total"),

            failures: register_int_counter_vec!(
                "vpa_admission_failures_total",
                "Admission reviews that failed, by error kind",
                &["kind"]
            )
            .expect("Failed to register vpa_admission_failures_total"),

            matched: register_int_counter!(
                "vpa_admission_matched_total",
                "Units that matched a recommendation"
            )
            .expect("Failed to register vpa_admission_matched_total"),

            edits: register_int_counter!(
                "vpa_admission_edits_total",
                "Edits returned across all admission reviews"
            )
            .expect("Failed to register vpa_admission_edits_total"),

            latency_seconds: register_histogram_vec!(
                "vpa_admission_latency_seconds",
                "Time spent answering an admission review",
                &["resource"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register vpa_admission_latency_seconds"),
        }
    }
}

/// Handle to the process-wide admission metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct AdmissionMetrics {
    _private: (),
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdmissionMetricsInner {
        GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new)
    }

    pub fn inc_requests(&self, resource: &str) {
        self.inner().requests.with_label_values(&[resource]).inc();
    }

    pub fn inc_failures(&self, kind: &str) {
        self.inner().failures.with_label_values(&[kind]).inc();
    }

    pub fn inc_matched(&self) {
        self.inner().matched.inc();
    }

    pub fn add_edits(&self, count: usize) {
        self.inner().edits.inc_by(count as u64);
    }

    pub fn observe_latency(&self, resource: &str, seconds: f64) {
        self.inner()
            .latency_seconds
            .with_label_values(&[resource])
            .observe(seconds);
    }

    pub fn failures(&self, kind: &str) -> u64 {
        self.inner().failures.with_label_values(&[kind]).get()
    }
}

/// Structured logger for admission events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_admitted(&self, unit: &str, namespace: &str, recommendation: &str, edits: usize) {
        info!(
            event = "admission_decided",
            component = %self.component,
            unit = %unit,
            namespace = %namespace,
            recommendation = %recommendation,
            edits = edits,
            "Computed resource edits"
        );
    }

    pub fn log_no_match(&self, unit: &str, namespace: &str) {
        debug!(
            event = "match_skipped",
            component = %self.component,
            unit = %unit,
            namespace = %namespace,
            "No recommendation controls this unit"
        );
    }

    pub fn log_recommendation_admitted(&self, name: &str, namespace: &str, operation: &str) {
        info!(
            event = "recommendation_validated",
            component = %self.component,
            recommendation = %name,
            namespace = %namespace,
            operation = %operation,
            "Recommendation object accepted"
        );
    }

    pub fn log_failure(&self, kind: &str, resource: &str, error: &str) {
        warn!(
            event = "request_failed",
            component = %self.component,
            kind = %kind,
            resource = %resource,
            error = %error,
            "Admission request failed"
        );
    }

    pub fn log_startup(&self, version: &str, features: &str) {
        info!(
            event = "server_started",
            component = %self.component,
            version = %version,
            features = %features,
            "Admission server started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            component = %self.component,
            reason = %reason,
            "Admission server shutting down"
        );
    }
}
