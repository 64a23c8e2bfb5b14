//! Admission decision builder
//!
//! Entry point of the core: takes a Pod, runs the recommendation provider
//! and turns its outcome into a JSON patch plus signals. The engine never
//! denies; callers decide what to do with [`Signal::MalformedInput`].

use crate::error::Signal;
use crate::lookup::collaborators;
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::patch::build_patch;
use crate::provider::{PodDecision, ProviderOutcome, RecommendationProvider};
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use std::time::Instant;
use tracing::debug;

/// Result of one admission call
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    /// Operations to apply, empty when the Pod is left as submitted
    pub patch: Patch,
    /// Provider outcome; `None` when the Pod could not be evaluated
    pub outcome: Option<ProviderOutcome>,
    pub signals: Vec<Signal>,
}

impl AdmissionOutcome {
    fn unchanged(outcome: Option<ProviderOutcome>, signals: Vec<Signal>) -> Self {
        Self {
            patch: Patch(Vec::new()),
            outcome,
            signals,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !self.patch.0.is_empty()
    }

    pub fn decision(&self) -> Option<&PodDecision> {
        self.outcome.as_ref().and_then(ProviderOutcome::decision)
    }

    /// Label used for the admissions metric
    pub fn label(&self) -> &'static str {
        match &self.outcome {
            None => "malformed_input",
            Some(ProviderOutcome::Recommended(_)) if self.is_mutating() => "mutated",
            Some(ProviderOutcome::Recommended(_)) => "unchanged",
            Some(outcome) => outcome.as_str(),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionEngine {
    provider: RecommendationProvider,
    metrics: AdmissionMetrics,
    logger: StructuredLogger,
}

impl AdmissionEngine {
    pub fn new(provider: RecommendationProvider, logger: StructuredLogger) -> Self {
        Self {
            provider,
            metrics: AdmissionMetrics::new(),
            logger,
        }
    }

    pub async fn admit(&self, pod: &Pod) -> AdmissionOutcome {
        let started = Instant::now();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let pod_name = pod
            .metadata
            .name
            .as_deref()
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or_default();

        let result = match self.provider.recommend(pod).await {
            Err(e) => {
                let signal = Signal::MalformedInput {
                    reason: e.to_string(),
                };
                self.logger.log_rejected_input(namespace, pod_name, &signal);
                AdmissionOutcome::unchanged(None, vec![signal])
            }
            Ok(outcome) => self.finish(pod, namespace, pod_name, outcome),
        };

        self.metrics.inc_admissions(result.label());
        self.metrics
            .observe_admission_latency(started.elapsed().as_secs_f64());
        debug!(
            namespace = %namespace,
            pod = %pod_name,
            outcome = result.label(),
            operations = result.patch.0.len(),
            "Admission decided"
        );
        result
    }

    fn finish(
        &self,
        pod: &Pod,
        namespace: &str,
        pod_name: &str,
        outcome: ProviderOutcome,
    ) -> AdmissionOutcome {
        match &outcome {
            ProviderOutcome::Unavailable { collaborator } => {
                self.metrics.inc_lookup_failures(collaborator);
                AdmissionOutcome::unchanged(Some(outcome), Vec::new())
            }
            ProviderOutcome::UnknownBounds { namespace, policy } => {
                self.metrics.inc_unknown_bounds();
                self.metrics
                    .inc_lookup_failures(collaborators::LIMIT_RANGE_LISTER);
                self.logger.log_unknown_bounds(namespace, pod_name, policy);
                let signal = Signal::UnknownBounds {
                    namespace: namespace.clone(),
                };
                AdmissionOutcome::unchanged(Some(outcome), vec![signal])
            }
            ProviderOutcome::Recommended(decision) => {
                let mut signals = Vec::new();
                for error in &decision.config_errors {
                    self.metrics.inc_configuration_errors();
                    self.logger.log_configuration_error(pod_name, error);
                    signals.push(Signal::from(error.clone()));
                }

                let mut capped = 0;
                for change in decision.changes() {
                    if let Some(reason) = change.reason {
                        capped += 1;
                        self.metrics.inc_capped(reason);
                        self.logger.log_capped(
                            namespace,
                            pod_name,
                            &change.container_name,
                            &change.resource,
                            &change.to.format_for(&change.resource),
                            reason,
                        );
                    }
                }

                let patch = build_patch(pod, decision);
                if !patch.0.is_empty() {
                    self.logger.log_admission(
                        namespace,
                        pod_name,
                        &decision.policy,
                        patch.0.len(),
                        capped,
                    );
                }
                AdmissionOutcome {
                    patch,
                    outcome: Some(outcome),
                    signals,
                }
            }
            ProviderOutcome::NoPolicy
            | ProviderOutcome::PolicyOff { .. }
            | ProviderOutcome::NoRecommendation { .. } => {
                AdmissionOutcome::unchanged(Some(outcome), Vec::new())
            }
        }
    }
}
