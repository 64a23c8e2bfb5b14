//! Core data models for the admission controller

use crate::quantity::{QuantityError, ResourceAmount};
use k8s_openapi::api::core::v1::LimitRange;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known resource names
pub mod resources {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
}

/// Per-resource amounts keyed by resource name
pub type ResourceVector = BTreeMap<String, ResourceAmount>;

/// Container policy name that applies to every container without its own entry
pub const DEFAULT_CONTAINER_POLICY: &str = "*";

/// Convert a Kubernetes resource list into a resource vector
pub fn resource_vector(
    list: Option<&BTreeMap<String, Quantity>>,
) -> Result<ResourceVector, QuantityError> {
    list.into_iter()
        .flatten()
        .map(|(name, quantity)| Ok((name.clone(), ResourceAmount::from_quantity(quantity)?)))
        .collect()
}

/// Autoscaling policy object (`autoscaling.k8s.io/v1` VerticalPodAutoscaler)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingPolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PolicyStatus>,
}

impl AutoscalingPolicy {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Effective update mode, `Auto` when unset
    pub fn update_mode(&self) -> UpdateMode {
        self.spec
            .update_policy
            .as_ref()
            .and_then(|p| p.update_mode)
            .unwrap_or_default()
    }

    /// Container policy for a container, falling back to the `*` entry
    pub fn container_policy(&self, container_name: &str) -> Option<&ContainerResourcePolicy> {
        let policies = &self.spec.resource_policy.as_ref()?.container_policies;
        policies
            .iter()
            .find(|p| p.container_name == container_name)
            .or_else(|| {
                policies
                    .iter()
                    .find(|p| p.container_name == DEFAULT_CONTAINER_POLICY)
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<ResourcePolicy>,
}

/// Controller targeted by a policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
}

/// Policy-wide update mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Recommendations are computed but never applied
    Off,
    /// Applied only when Pods are created
    Initial,
    Recreate,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<UpdateMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicy {
    #[serde(default)]
    pub container_policies: Vec<ContainerResourcePolicy>,
}

/// Per-container scaling mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerScalingMode {
    #[default]
    Auto,
    Off,
    RecommendationOnly,
}

impl ContainerScalingMode {
    /// Whether admission may rewrite this container's resources
    pub fn is_applied(self) -> bool {
        self == ContainerScalingMode::Auto
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcePolicy {
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ContainerScalingMode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub min_allowed: ResourceVector,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max_allowed: ResourceVector,
    /// Resources the policy manages; everything else is opted out.
    /// Defaults to cpu and memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_resources: Option<Vec<String>>,
}

impl ContainerResourcePolicy {
    pub fn mode(&self) -> ContainerScalingMode {
        self.mode.unwrap_or_default()
    }

    pub fn controls(&self, resource: &str) -> bool {
        match &self.controlled_resources {
            Some(list) => list.iter().any(|r| r == resource),
            None => resource == resources::CPU || resource == resources::MEMORY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<PodRecommendation>,
}

/// Recommendation computed for every container governed by a policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecommendation {
    #[serde(default)]
    pub container_recommendations: Vec<ContainerRecommendation>,
}

impl PodRecommendation {
    pub fn for_container(&self, name: &str) -> Option<&ContainerRecommendation> {
        self.container_recommendations
            .iter()
            .find(|r| r.container_name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecommendation {
    pub container_name: String,
    #[serde(default)]
    pub target: ResourceVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<ResourceVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<ResourceVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncapped_target: Option<ResourceVector>,
}

/// LimitRange annotation that scopes its container items to matching container names
pub const CONTAINER_PATTERN_ANNOTATION: &str = "autoscaling.k8s.io/container-name-pattern";

/// Namespace-level bound on container resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeConstraint {
    /// Name of the object the constraint came from
    pub source: String,
    /// Anchored regular expression over container names; `None` applies to all
    pub container_pattern: Option<String>,
    pub min: ResourceVector,
    pub max: ResourceVector,
    pub default_limit: ResourceVector,
    pub default_request: ResourceVector,
    pub max_limit_request_ratio: ResourceVector,
    /// Quantities that could not be read and were left out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<String>,
}

impl RangeConstraint {
    /// Extract the `Container` items of a LimitRange.
    ///
    /// An unreadable quantity drops only that resource; it is recorded in
    /// `unreadable` so the namespace can report it.
    pub fn from_limit_range(limit_range: &LimitRange) -> Vec<Self> {
        let source = limit_range.metadata.name.clone().unwrap_or_default();
        let container_pattern = limit_range
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CONTAINER_PATTERN_ANNOTATION))
            .cloned();
        let Some(spec) = &limit_range.spec else {
            return Vec::new();
        };

        spec.limits
            .iter()
            .filter(|item| item.type_ == "Container")
            .map(|item| {
                let mut unreadable = Vec::new();
                let mut read = |field: &str, list: Option<&BTreeMap<String, Quantity>>| {
                    readable_vector(field, list, &mut unreadable)
                };
                let min = read("min", item.min.as_ref());
                let max = read("max", item.max.as_ref());
                let default_limit = read("default", item.default.as_ref());
                let default_request = read("defaultRequest", item.default_request.as_ref());
                let max_limit_request_ratio =
                    read("maxLimitRequestRatio", item.max_limit_request_ratio.as_ref());
                Self {
                    source: source.clone(),
                    container_pattern: container_pattern.clone(),
                    min,
                    max,
                    default_limit,
                    default_request,
                    max_limit_request_ratio,
                    unreadable,
                }
            })
            .collect()
    }
}

/// Like [`resource_vector`], but skips unreadable entries and describes them
fn readable_vector(
    field: &str,
    list: Option<&BTreeMap<String, Quantity>>,
    unreadable: &mut Vec<String>,
) -> ResourceVector {
    let mut vector = ResourceVector::new();
    for (name, quantity) in list.into_iter().flatten() {
        match ResourceAmount::from_quantity(quantity) {
            Ok(amount) => {
                vector.insert(name.clone(), amount);
            }
            Err(e) => unreadable.push(format!("{field} {name}: {e}")),
        }
    }
    vector
}

/// Which bound changed a recommended value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapReason {
    PolicyMin,
    PolicyMax,
    NamespaceRange,
    RatioPreserving,
    ContainerLimit,
}

impl CapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapReason::PolicyMin => "policy-min",
            CapReason::PolicyMax => "policy-max",
            CapReason::NamespaceRange => "namespace-range",
            CapReason::RatioPreserving => "ratio-preserving",
            CapReason::ContainerLimit => "container-limit",
        }
    }
}

impl fmt::Display for CapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A final value plus the bound that produced it, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedValue {
    pub value: ResourceAmount,
    pub was_capped: bool,
    pub reason: Option<CapReason>,
}

impl CappedValue {
    pub fn new(value: ResourceAmount, reason: Option<CapReason>) -> Self {
        Self {
            value,
            was_capped: reason.is_some(),
            reason,
        }
    }
}

/// Capped request (and optionally limit) for one resource of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedResource {
    pub request: CappedValue,
    pub limit: Option<CappedValue>,
}

/// Capped recommendation for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CappedContainer {
    pub container_name: String,
    pub mode: ContainerScalingMode,
    pub resources: BTreeMap<String, CappedResource>,
    pub config_errors: Vec<ConfigurationError>,
}

impl CappedContainer {
    pub fn was_capped(&self) -> bool {
        self.resources.values().any(|r| {
            r.request.was_capped || r.limit.map(|l| l.was_capped).unwrap_or(false)
        })
    }
}

/// An infeasible or unusable administrative bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("configuration error in namespace {namespace}: {detail}")]
pub struct ConfigurationError {
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub detail: String,
}
