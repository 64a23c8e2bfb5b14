//! Recommendation provider
//!
//! Runs the per-Pod pipeline: preprocess, list policies, resolve the
//! controller (only when some policy targets one), match, fetch the
//! recommendation, resolve namespace ranges and cap each container.
//!
//! Lookup failures never leave this module as errors. They become
//! outcomes ([`ProviderOutcome::Unavailable`], [`ProviderOutcome::UnknownBounds`])
//! so the caller can decide how to report them. Only an unusable Pod
//! payload is an error.

use crate::capping::{CapInput, ExistingResources, RecommendationCapper};
use crate::controller::{ControllerRef, ControllerResolver};
use crate::limitrange::{LimitRangeResolver, NamespaceRanges, RangeLookup};
use crate::lookup::{collaborators, PolicyLister, RecommendationSource};
use crate::matcher::{needs_controller, select_policy};
use crate::models::{
    resource_vector, AutoscalingPolicy, CapReason, CappedResource, ConfigurationError,
    ContainerScalingMode, PodRecommendation, ResourceVector, UpdateMode,
};
use crate::preprocess::PodPreprocessor;
use crate::quantity::{QuantityError, ResourceAmount};
use k8s_openapi::api::core::v1::{Container, Pod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};


/// The Pod payload cannot be evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("pod has no namespace")]
    MissingNamespace,

    #[error("container {container} has an invalid {field} quantity: {source}")]
    InvalidQuantity {
        container: String,
        field: ResourceField,
        #[source]
        source: QuantityError,
    },
}

/// Which resource map of a container a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceField {
    Requests,
    Limits,
}

impl ResourceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceField::Requests => "requests",
            ResourceField::Limits => "limits",
        }
    }
}

impl fmt::Display for ResourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value that differs from what the container declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub container_index: usize,
    pub container_name: String,
    pub field: ResourceField,
    pub resource: String,
    pub from: Option<ResourceAmount>,
    pub to: ResourceAmount,
    pub reason: Option<CapReason>,
}

/// Final values for one container of the Pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDecision {
    pub index: usize,
    pub name: String,
    pub mode: ContainerScalingMode,
    pub resources: BTreeMap<String, CappedResource>,
    pub changes: Vec<ResourceChange>,
}

/// Per-container decisions for a Pod governed by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDecision {
    pub policy: String,
    pub containers: Vec<ContainerDecision>,
    pub config_errors: Vec<ConfigurationError>,
}

impl PodDecision {
    /// All changes in container order, requests before limits
    pub fn changes(&self) -> impl Iterator<Item = &ResourceChange> {
        self.containers.iter().flat_map(|c| c.changes.iter())
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    pub fn capped_reasons(&self) -> impl Iterator<Item = CapReason> + '_ {
        self.containers
            .iter()
            .flat_map(|c| c.resources.values())
            .flat_map(|r| [Some(r.request), r.limit])
            .flatten()
            .filter_map(|v| v.reason)
    }
}

/// What the provider decided for a Pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderOutcome {
    NoPolicy,
    PolicyOff { policy: String },
    /// The matched policy has no recommendation yet
    NoRecommendation { policy: String },
    /// A lookup needed to decide failed
    Unavailable { collaborator: String },
    /// Namespace ranges could not be read; capping was skipped
    UnknownBounds { namespace: String, policy: String },
    Recommended(PodDecision),
}

impl ProviderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOutcome::NoPolicy => "no_policy",
            ProviderOutcome::PolicyOff { .. } => "policy_off",
            ProviderOutcome::NoRecommendation { .. } => "no_recommendation",
            ProviderOutcome::Unavailable { .. } => "unavailable",
            ProviderOutcome::UnknownBounds { .. } => "unknown_bounds",
            ProviderOutcome::Recommended(_) => "recommended",
        }
    }

    pub fn decision(&self) -> Option<&PodDecision> {
        match self {
            ProviderOutcome::Recommended(decision) => Some(decision),
            _ => None,
        }
    }
}

/// Collaborators the provider consults
#[derive(Clone)]
pub struct ProviderDeps {
    pub policies: Arc<dyn PolicyLister>,
    pub controllers: ControllerResolver,
    pub ranges: LimitRangeResolver,
    pub recommendations: Arc<dyn RecommendationSource>,
    pub preprocessor: Arc<dyn PodPreprocessor>,
}

#[derive(Clone)]
pub struct RecommendationProvider {
    deps: ProviderDeps,
    capper: RecommendationCapper,
}

impl RecommendationProvider {
    pub fn new(deps: ProviderDeps, capper: RecommendationCapper) -> Self {
        Self { deps, capper }
    }

    pub async fn recommend(&self, pod: &Pod) -> Result<ProviderOutcome, ProviderError> {
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or(ProviderError::MissingNamespace)?;
        let pod = self.deps.preprocessor.process(pod);

        let policies = match self.deps.policies.list_policies(namespace).await {
            Ok(policies) => policies,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Cannot list policies");
                return Ok(ProviderOutcome::Unavailable {
                    collaborator: e.collaborator().to_string(),
                });
            }
        };
        if policies.is_empty() {
            return Ok(ProviderOutcome::NoPolicy);
        }

        let controller = if needs_controller(&policies) {
            self.deps.controllers.resolve(&pod).await
        } else {
            None
        };

        let Some(matched) = select_policy(&pod, controller.as_ref(), &policies) else {
            debug!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                controller = ?controller.as_ref().map(ControllerRef::to_string),
                "No policy matches pod"
            );
            return Ok(ProviderOutcome::NoPolicy);
        };
        let policy = matched.policy;
        let policy_name = policy.name().to_string();

        if policy.update_mode() == UpdateMode::Off {
            debug!(namespace = %namespace, policy = %policy_name, "Policy update mode is Off");
            return Ok(ProviderOutcome::PolicyOff {
                policy: policy_name,
            });
        }

        let recommendation = match self.deps.recommendations.recommendation_for(policy).await {
            Ok(Some(recommendation)) => recommendation,
            Ok(None) => {
                debug!(namespace = %namespace, policy = %policy_name, "Policy has no recommendation yet");
                return Ok(ProviderOutcome::NoRecommendation {
                    policy: policy_name,
                });
            }
            Err(e) => {
                warn!(namespace = %namespace, policy = %policy_name, error = %e, "Cannot fetch recommendation");
                return Ok(ProviderOutcome::Unavailable {
                    collaborator: collaborators::RECOMMENDATION_SOURCE.to_string(),
                });
            }
        };

        let ranges = match self.deps.ranges.resolve(namespace).await {
            RangeLookup::Known(ranges) => ranges,
            RangeLookup::Unknown => {
                return Ok(ProviderOutcome::UnknownBounds {
                    namespace: namespace.to_string(),
                    policy: policy_name,
                });
            }
        };

        let decision = self.decide(&pod, policy, &recommendation, &ranges)?;
        info!(
            namespace = %namespace,
            pod = ?pod.metadata.name,
            policy = %decision.policy,
            changes = decision.changes().count(),
            "Computed pod recommendation"
        );
        Ok(ProviderOutcome::Recommended(decision))
    }

    fn decide(
        &self,
        pod: &Pod,
        policy: &AutoscalingPolicy,
        recommendation: &PodRecommendation,
        ranges: &NamespaceRanges,
    ) -> Result<PodDecision, ProviderError> {
        let mut decision = PodDecision {
            policy: policy.name().to_string(),
            containers: Vec::new(),
            config_errors: ranges.config_errors.clone(),
        };

        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
        for (index, container) in containers.iter().enumerate() {
            let Some(target) = recommendation.for_container(&container.name) else {
                continue;
            };
            let (requests, limits) = existing_resources(container)?;
            let bounds = ranges.for_container(&container.name);

            let capped = self.capper.cap_container(CapInput {
                namespace: &ranges.namespace,
                recommendation: target,
                policy: policy.container_policy(&container.name),
                bounds: &bounds,
                existing: ExistingResources {
                    requests: &requests,
                    limits: &limits,
                },
            });

            let mut changes = Vec::new();
            for (resource, values) in &capped.resources {
                let change = |field, from: Option<&ResourceAmount>, to: ResourceAmount, reason| {
                    (from != Some(&to)).then(|| ResourceChange {
                        container_index: index,
                        container_name: container.name.clone(),
                        field,
                        resource: resource.clone(),
                        from: from.copied(),
                        to,
                        reason,
                    })
                };
                changes.extend(change(
                    ResourceField::Requests,
                    requests.get(resource),
                    values.request.value,
                    values.request.reason,
                ));
                if let Some(limit) = values.limit {
                    changes.extend(change(
                        ResourceField::Limits,
                        limits.get(resource),
                        limit.value,
                        limit.reason,
                    ));
                }
            }
            // requests before limits within a container
            changes.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.resource.cmp(&b.resource)));

            decision.config_errors.extend(capped.config_errors);
            decision.containers.push(ContainerDecision {
                index,
                name: container.name.clone(),
                mode: capped.mode,
                resources: capped.resources,
                changes,
            });
        }

        Ok(decision)
    }
}

fn existing_resources(container: &Container) -> Result<(ResourceVector, ResourceVector), ProviderError> {
    let resources = container.resources.as_ref();
    let requests = resource_vector(resources.and_then(|r| r.requests.as_ref())).map_err(|source| {
        ProviderError::InvalidQuantity {
            container: container.name.clone(),
            field: ResourceField::Requests,
            source,
        }
    })?;
    let limits = resource_vector(resources.and_then(|r| r.limits.as_ref())).map_err(|source| {
        ProviderError::InvalidQuantity {
            container: container.name.clone(),
            field: ResourceField::Limits,
            source,
        }
    })?;
    Ok((requests, limits))
}
