//! Observability infrastructure for the admission controller
//!
//! Provides:
//! - Prometheus metrics (admission latency, outcomes, capping reasons, lookup failures)
//! - Structured JSON logging with tracing

use crate::error::Signal;
use crate::models::{CapReason, ConfigurationError};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for admission latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdmissionMetricsInner> = OnceLock::new();

struct AdmissionMetricsInner {
    admission_latency_seconds: Histogram,
    admissions_total: IntCounterVec,
    capped_total: IntCounterVec,
    unknown_bounds_total: IntCounter,
    configuration_errors_total: IntCounter,
    lookup_failures_total: IntCounterVec,
}

impl AdmissionMetricsInner {
    fn new() -> Self {
        Self {
            admission_latency_seconds: register_histogram!(
                "vpa_admission_latency_seconds",
                "Time spent deciding on a pod admission",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register admission_latency_seconds"),

            admissions_total: register_int_counter_vec!(
                "vpa_admission_requests_total",
                "Pod admissions by outcome",
                &["outcome"]
            )
            .expect("Failed to register admission_requests_total"),

            capped_total: register_int_counter_vec!(
                "vpa_admission_capped_total",
                "Resource values changed by a bound, by reason",
                &["reason"]
            )
            .expect("Failed to register capped_total"),

            unknown_bounds_total: register_int_counter!(
                "vpa_admission_unknown_bounds_total",
                "Admissions that skipped capping because namespace ranges were unknown"
            )
            .expect("Failed to register unknown_bounds_total"),

            configuration_errors_total: register_int_counter!(
                "vpa_admission_configuration_errors_total",
                "Infeasible or unusable administrative bounds encountered"
            )
            .expect("Failed to register configuration_errors_total"),

            lookup_failures_total: register_int_counter_vec!(
                "vpa_admission_lookup_failures_total",
                "Failed lookups by collaborator",
                &["collaborator"]
            )
            .expect("Failed to register lookup_failures_total"),
        }
    }
}

/// Admission metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AdmissionMetrics {
    inner: &'static AdmissionMetricsInner,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new),
        }
    }

    pub fn observe_admission_latency(&self, duration_secs: f64) {
        self.inner.admission_latency_seconds.observe(duration_secs);
    }

    pub fn inc_admissions(&self, outcome: &str) {
        self.inner
            .admissions_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_capped(&self, reason: CapReason) {
        self.inner
            .capped_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn inc_unknown_bounds(&self) {
        self.inner.unknown_bounds_total.inc();
    }

    pub fn inc_configuration_errors(&self) {
        self.inner.configuration_errors_total.inc();
    }

    pub fn inc_lookup_failures(&self, collaborator: &str) {
        self.inner
            .lookup_failures_total
            .with_label_values(&[collaborator])
            .inc();
    }
}

/// Structured logger for admission events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a mutated pod admission
    pub fn log_admission(
        &self,
        namespace: &str,
        pod_name: &str,
        policy: &str,
        operations: usize,
        capped: usize,
    ) {
        info!(
            event = "pod_mutated",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            policy = %policy,
            operations = operations,
            capped = capped,
            "Applied recommendation to pod"
        );
    }

    /// Log a capped value
    pub fn log_capped(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &str,
        resource: &str,
        value: &str,
        reason: CapReason,
    ) {
        info!(
            event = "recommendation_capped",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            container = %container,
            resource = %resource,
            value = %value,
            reason = %reason,
            "Recommendation capped"
        );
    }

    pub fn log_unknown_bounds(&self, namespace: &str, pod_name: &str, policy: &str) {
        warn!(
            event = "unknown_bounds",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            policy = %policy,
            "Namespace ranges unknown, pod left unchanged"
        );
    }

    pub fn log_configuration_error(&self, pod_name: &str, error: &ConfigurationError) {
        warn!(
            event = "configuration_error",
            instance = %self.instance,
            namespace = %error.namespace,
            pod_name = %pod_name,
            container = ?error.container,
            resource = ?error.resource,
            detail = %error.detail,
            "Infeasible resource bounds"
        );
    }

    pub fn log_rejected_input(&self, namespace: &str, pod_name: &str, signal: &Signal) {
        warn!(
            event = "malformed_input",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            signal = %signal,
            "Pod could not be evaluated"
        );
    }

    pub fn log_startup(&self, version: &str, allow_adjust_limits: bool) {
        info!(
            event = "admission_controller_started",
            instance = %self.instance,
            version = %version,
            allow_adjust_limits = allow_adjust_limits,
            "Admission controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "admission_controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Admission controller shutting down"
        );
    }
}
