//! Recommendation capping
//!
//! Clamps a raw per-container recommendation into the policy's declared
//! range and the namespace's resource range. When both apply, the result
//! always lies in their intersection, so the tighter bound wins. An empty
//! intersection is reported as a configuration error and the resource is
//! left untouched.
//!
//! Limits are handled in one of two ways:
//! - limits may not be adjusted: the request is capped to the container's
//!   limit (or the namespace default limit), and raised to at least
//!   `limit / maxLimitRequestRatio` when the namespace sets a ratio
//! - limits may be adjusted: the limit is scaled by the same ratio as the
//!   request, then clamped to the namespace range and never set below the
//!   request

use crate::limitrange::Bounds;
use crate::models::{
    CapReason, CappedContainer, CappedResource, CappedValue, ConfigurationError,
    ContainerRecommendation, ContainerResourcePolicy, ContainerScalingMode, ResourceVector,
};
use crate::quantity::{is_binary_resource, ResourceAmount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Caller configuration for the capper
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappingConfig {
    /// Scale limits along with requests
    pub allow_adjust_limits: bool,
}

/// Requests and limits a container declared before admission
#[derive(Debug, Clone, Copy)]
pub struct ExistingResources<'a> {
    pub requests: &'a ResourceVector,
    pub limits: &'a ResourceVector,
}

/// Everything the capper needs to know about one container
pub struct CapInput<'a> {
    pub namespace: &'a str,
    pub recommendation: &'a ContainerRecommendation,
    pub policy: Option<&'a ContainerResourcePolicy>,
    pub bounds: &'a Bounds,
    pub existing: ExistingResources<'a>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationCapper {
    config: CappingConfig,
}

impl RecommendationCapper {
    pub fn new(config: CappingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> CappingConfig {
        self.config
    }

    pub fn cap_container(&self, input: CapInput<'_>) -> CappedContainer {
        let container_name = input.recommendation.container_name.clone();
        let mode = input
            .policy
            .map(ContainerResourcePolicy::mode)
            .unwrap_or_default();
        let mut capped = CappedContainer {
            container_name,
            mode,
            resources: BTreeMap::new(),
            config_errors: Vec::new(),
        };

        if mode != ContainerScalingMode::Auto {
            debug!(
                container = %capped.container_name,
                mode = ?mode,
                "Container not scaled at admission"
            );
            return capped;
        }

        let default_policy = ContainerResourcePolicy::default();
        let policy = input.policy.unwrap_or(&default_policy);

        for (resource, raw) in &input.recommendation.target {
            if !policy.controls(resource) {
                continue;
            }
            match self.cap_resource(&input, policy, resource, *raw) {
                Ok(result) => {
                    capped.resources.insert(resource.clone(), result);
                }
                Err(e) => capped.config_errors.push(e),
            }
        }
        capped
    }

    fn cap_resource(
        &self,
        input: &CapInput<'_>,
        policy: &ContainerResourcePolicy,
        resource: &str,
        raw: ResourceAmount,
    ) -> Result<CappedResource, ConfigurationError> {
        let policy_min = policy.min_allowed.get(resource).copied();
        let policy_max = policy.max_allowed.get(resource).copied();
        let range_min = input.bounds.min.get(resource).copied();
        let range_max = input.bounds.max.get(resource).copied();

        let lower = policy_min.max(range_min);
        let upper = match (policy_max, range_max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let (Some(lower), Some(upper)) = (lower, upper) {
            if lower > upper {
                return Err(ConfigurationError {
                    namespace: input.namespace.to_string(),
                    container: Some(input.recommendation.container_name.clone()),
                    resource: Some(resource.to_string()),
                    detail: format!(
                        "container {} resource {}: minimum {} exceeds maximum {}",
                        input.recommendation.container_name,
                        resource,
                        lower.format_for(resource),
                        upper.format_for(resource)
                    ),
                });
            }
        }

        // policy first, then the namespace range; with a non-empty
        // intersection the later clamp only fires when it is tighter
        let mut value = raw;
        let mut reason = None;
        for (bound, is_min, bound_reason) in [
            (policy_min, true, CapReason::PolicyMin),
            (policy_max, false, CapReason::PolicyMax),
            (range_min, true, CapReason::NamespaceRange),
            (range_max, false, CapReason::NamespaceRange),
        ] {
            let Some(bound) = bound else { continue };
            if (is_min && value < bound) || (!is_min && value > bound) {
                value = bound;
                reason = Some(bound_reason);
            }
        }

        let existing_limit = input
            .existing
            .limits
            .get(resource)
            .or_else(|| input.bounds.default_limit.get(resource))
            .copied();

        if !self.config.allow_adjust_limits {
            if let Some(limit) = existing_limit {
                if value > limit {
                    value = limit;
                    reason = Some(CapReason::ContainerLimit);
                }
                if let Some(ratio) = input.bounds.max_limit_request_ratio.get(resource) {
                    // the fixed limit puts a floor under the request
                    let floor = limit
                        .scale(ResourceAmount::from_units(1), *ratio)
                        .map(|floor| round_up(resource, floor));
                    if let Some(floor) = floor.filter(|floor| value < *floor) {
                        let ceiling = upper.map_or(limit, |upper| upper.min(limit));
                        if floor > ceiling {
                            return Err(ConfigurationError {
                                namespace: input.namespace.to_string(),
                                container: Some(input.recommendation.container_name.clone()),
                                resource: Some(resource.to_string()),
                                detail: format!(
                                    "container {} resource {}: limit {} with maximum limit/request ratio {} needs a request of at least {}, above maximum {}",
                                    input.recommendation.container_name,
                                    resource,
                                    limit.format_for(resource),
                                    ratio,
                                    floor.format_for(resource),
                                    ceiling.format_for(resource)
                                ),
                            });
                        }
                        value = floor;
                        reason = Some(CapReason::NamespaceRange);
                    }
                }
            }
            return Ok(CappedResource {
                request: CappedValue::new(value, reason),
                limit: None,
            });
        }

        let limit = existing_limit.map(|old_limit| {
            let old_request = input
                .existing
                .requests
                .get(resource)
                .or_else(|| input.bounds.default_request.get(resource))
                .copied()
                .unwrap_or(old_limit);
            self.scale_limit(input.bounds, resource, old_limit, old_request, value)
        });

        Ok(CappedResource {
            request: CappedValue::new(value, reason),
            limit,
        })
    }

    /// Scale a limit by the request's change ratio and keep it feasible
    fn scale_limit(
        &self,
        bounds: &Bounds,
        resource: &str,
        old_limit: ResourceAmount,
        old_request: ResourceAmount,
        request: ResourceAmount,
    ) -> CappedValue {
        let mut limit = old_limit
            .scale(request, old_request)
            .map(|scaled| round_up(resource, scaled))
            .unwrap_or(old_limit);
        let mut reason = (limit != old_limit).then_some(CapReason::RatioPreserving);

        if let Some(max) = bounds.max.get(resource) {
            if limit > *max {
                limit = *max;
                reason = Some(CapReason::NamespaceRange);
            }
        }
        if let Some(ratio) = bounds.max_limit_request_ratio.get(resource) {
            if let Some(mut allowed) = request.scale(*ratio, ResourceAmount::from_units(1)) {
                if is_binary_resource(resource) {
                    allowed = allowed.floor_to_unit();
                }
                if limit > allowed {
                    limit = allowed;
                    reason = Some(CapReason::NamespaceRange);
                }
            }
        }
        if limit < request {
            limit = request;
            reason = Some(CapReason::RatioPreserving);
        }

        CappedValue::new(limit, reason)
    }
}

/// Byte-sized resources are never fractional
fn round_up(resource: &str, amount: ResourceAmount) -> ResourceAmount {
    if is_binary_resource(resource) {
        amount.ceil_to_unit()
    } else {
        amount
    }
}
