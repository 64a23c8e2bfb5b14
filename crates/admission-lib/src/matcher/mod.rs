//! Policy matching
//!
//! Selects the single autoscaling policy that governs a Pod. A policy is a
//! candidate when its selector (if any) matches the Pod labels and its
//! `targetRef` (if any) names the Pod's resolved controller. Competing
//! candidates are ranked by:
//!
//! 1. `targetRef` matches before selector-only matches
//! 2. more selector requirements first
//! 3. earlier creation timestamp first, missing timestamps last
//! 4. name ascending

mod selector;

pub use selector::{CompiledSelector, SelectorError};

use crate::controller::ControllerRef;
use crate::models::AutoscalingPolicy;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A policy selected for a Pod, with the facts used to rank it
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMatch<'a> {
    pub policy: &'a AutoscalingPolicy,
    pub via_target: bool,
    pub specificity: usize,
}

/// Whether any policy needs the Pod's controller to be resolved
pub fn needs_controller(policies: &[AutoscalingPolicy]) -> bool {
    policies.iter().any(|p| p.spec.target_ref.is_some())
}

/// Pick the governing policy for a Pod, if any
pub fn select_policy<'a>(
    pod: &Pod,
    controller: Option<&ControllerRef>,
    policies: &'a [AutoscalingPolicy],
) -> Option<PolicyMatch<'a>> {
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);

    let mut candidates: Vec<PolicyMatch<'a>> = policies
        .iter()
        .filter_map(|policy| match candidate(policy, labels, controller) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    namespace = %policy.namespace(),
                    policy = %policy.name(),
                    error = %e,
                    "Skipping policy with malformed selector"
                );
                None
            }
        })
        .collect();

    candidates.sort_by(rank);
    if candidates.len() > 1 {
        debug!(
            pod = ?pod.metadata.name,
            candidates = candidates.len(),
            selected = %candidates[0].policy.name(),
            "Multiple policies match, using highest ranked"
        );
    }
    candidates.into_iter().next()
}

fn candidate<'a>(
    policy: &'a AutoscalingPolicy,
    labels: &BTreeMap<String, String>,
    controller: Option<&ControllerRef>,
) -> Result<Option<PolicyMatch<'a>>, SelectorError> {
    let spec = &policy.spec;
    if spec.target_ref.is_none() && spec.selector.is_none() {
        warn!(
            namespace = %policy.namespace(),
            policy = %policy.name(),
            "Policy declares neither targetRef nor selector"
        );
        return Ok(None);
    }

    let specificity = match &spec.selector {
        Some(selector) => {
            let compiled = CompiledSelector::compile(selector)?;
            if !compiled.matches(labels) {
                return Ok(None);
            }
            compiled.specificity()
        }
        None => 0,
    };

    let via_target = match &spec.target_ref {
        Some(target) => {
            let Some(controller) = controller else {
                return Ok(None);
            };
            if target.kind != controller.kind.as_str() || target.name != controller.name {
                return Ok(None);
            }
            true
        }
        None => false,
    };

    Ok(Some(PolicyMatch {
        policy,
        via_target,
        specificity,
    }))
}

fn rank(a: &PolicyMatch<'_>, b: &PolicyMatch<'_>) -> Ordering {
    b.via_target
        .cmp(&a.via_target)
        .then_with(|| b.specificity.cmp(&a.specificity))
        .then_with(|| {
            creation_order(
                a.policy.metadata.creation_timestamp.as_ref(),
                b.policy.metadata.creation_timestamp.as_ref(),
            )
        })
        .then_with(|| a.policy.name().cmp(b.policy.name()))
}

fn creation_order(a: Option<&Time>, b: Option<&Time>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.0.cmp(&b.0),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
