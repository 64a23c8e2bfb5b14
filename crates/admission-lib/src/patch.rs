//! JSON Patch construction for admission responses
//!
//! Operations address the Pod exactly as it was submitted. Missing
//! `resources`, `requests` or `limits` objects are created with an `add` of
//! an empty object right before the first value that needs them. Only
//! resource values are ever touched.

use crate::provider::{PodDecision, ResourceChange, ResourceField};
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Escape a reference token per RFC 6901
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn resources_path(index: usize) -> String {
    format!("/spec/containers/{index}/resources")
}

/// Build the patch that applies a decision to the original Pod
pub fn build_patch(original: &Pod, decision: &PodDecision) -> Patch {
    let containers = original
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();
    let mut created: HashSet<String> = HashSet::new();
    let mut operations = Vec::new();

    for change in decision.changes() {
        let Some(container) = containers.get(change.container_index) else {
            warn!(
                container = %change.container_name,
                index = change.container_index,
                "Change addresses a container missing from the pod"
            );
            continue;
        };
        let resources = container.resources.as_ref();
        let base = resources_path(change.container_index);
        if resources.is_none() && created.insert(base.clone()) {
            operations.push(add(base.clone(), Value::Object(Default::default())));
        }

        let field_exists = resources
            .map(|r| match change.field {
                ResourceField::Requests => r.requests.is_some(),
                ResourceField::Limits => r.limits.is_some(),
            })
            .unwrap_or(false);
        let field_path = format!("{base}/{}", change.field.as_str());
        if !field_exists && created.insert(field_path.clone()) {
            operations.push(add(field_path.clone(), Value::Object(Default::default())));
        }

        operations.push(value_operation(&field_path, change));
    }

    Patch(operations)
}

fn value_operation(field_path: &str, change: &ResourceChange) -> PatchOperation {
    let path = format!("{field_path}/{}", escape_token(&change.resource));
    let value = Value::String(change.to.format_for(&change.resource));
    if change.from.is_some() {
        PatchOperation::Replace(ReplaceOperation { path, value })
    } else {
        add(path, value)
    }
}

fn add(path: String, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapReason, ContainerScalingMode};
    use crate::provider::ContainerDecision;
    use crate::quantity::ResourceAmount;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn pod(containers: Vec<Container>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn change(
        index: usize,
        field: ResourceField,
        resource: &str,
        from: Option<&str>,
        to: &str,
    ) -> ResourceChange {
        ResourceChange {
            container_index: index,
            container_name: format!("c{index}"),
            field,
            resource: resource.to_string(),
            from: from.map(|f| ResourceAmount::parse(f).unwrap()),
            to: ResourceAmount::parse(to).unwrap(),
            reason: None,
        }
    }

    fn decision(changes: Vec<ResourceChange>) -> PodDecision {
        let mut containers: Vec<ContainerDecision> = Vec::new();
        for change in changes {
            match containers.iter_mut().find(|c| c.index == change.container_index) {
                Some(container) => container.changes.push(change),
                None => containers.push(ContainerDecision {
                    index: change.container_index,
                    name: change.container_name.clone(),
                    mode: ContainerScalingMode::Auto,
                    resources: BTreeMap::new(),
                    changes: vec![change],
                }),
            }
        }
        PodDecision {
            policy: "web".to_string(),
            containers,
            config_errors: Vec::new(),
        }
    }

    fn apply(pod: &Pod, patch: &Patch) -> Pod {
        let mut doc = serde_json::to_value(pod).unwrap();
        json_patch::patch(&mut doc, patch).unwrap();
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_escape_token() {
        assert_eq!(escape_token("cpu"), "cpu");
        assert_eq!(escape_token("nvidia.com/gpu"), "nvidia.com~1gpu");
        assert_eq!(escape_token("a~b/c"), "a~0b~1c");
    }

    #[test]
    fn test_empty_decision_is_empty_patch() {
        let original = pod(vec![Container::default()]);
        assert!(build_patch(&original, &decision(vec![])).0.is_empty());
    }

    #[test]
    fn test_scaffolds_missing_objects_once() {
        let original = pod(vec![Container {
            name: "c0".to_string(),
            ..Default::default()
        }]);
        let patch = build_patch(
            &original,
            &decision(vec![
                change(0, ResourceField::Requests, "cpu", None, "250m"),
                change(0, ResourceField::Requests, "memory", None, "256Mi"),
            ]),
        );

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"op": "add", "path": "/spec/containers/0/resources", "value": {}},
                {"op": "add", "path": "/spec/containers/0/resources/requests", "value": {}},
                {"op": "add", "path": "/spec/containers/0/resources/requests/cpu", "value": "250m"},
                {"op": "add", "path": "/spec/containers/0/resources/requests/memory", "value": "256Mi"}
            ])
        );

        let patched = apply(&original, &patch);
        let requests = patched.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap()
            .requests
            .unwrap();
        assert_eq!(requests["cpu"], Quantity("250m".to_string()));
    }

    #[test]
    fn test_existing_values_are_replaced() {
        let original = pod(vec![
            Container::default(),
            Container {
                name: "c1".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "cpu".to_string(),
                        Quantity("100m".to_string()),
                    )])),
                    limits: Some(BTreeMap::new()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]);
        let mut capped = change(1, ResourceField::Requests, "cpu", Some("100m"), "2");
        capped.reason = Some(CapReason::NamespaceRange);
        let patch = build_patch(
            &original,
            &decision(vec![
                capped,
                change(1, ResourceField::Limits, "nvidia.com/gpu", None, "1"),
            ]),
        );

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"op": "replace", "path": "/spec/containers/1/resources/requests/cpu", "value": "2"},
                {"op": "add", "path": "/spec/containers/1/resources/limits/nvidia.com~1gpu", "value": "1"}
            ])
        );

        let patched = apply(&original, &patch);
        let resources = patched.spec.unwrap().containers[1].resources.clone().unwrap();
        assert_eq!(resources.requests.unwrap()["cpu"], Quantity("2".to_string()));
        assert_eq!(resources.limits.unwrap()["nvidia.com/gpu"], Quantity("1".to_string()));
    }

    #[test]
    fn test_patch_touches_only_resource_values() {
        let original = pod(vec![Container {
            name: "c0".to_string(),
            image: Some("nginx".to_string()),
            ..Default::default()
        }]);
        let patch = build_patch(
            &original,
            &decision(vec![
                change(0, ResourceField::Requests, "memory", None, "1Gi"),
                change(0, ResourceField::Limits, "memory", None, "2Gi"),
            ]),
        );

        for operation in &patch.0 {
            let path = match operation {
                PatchOperation::Add(op) => &op.path,
                PatchOperation::Replace(op) => &op.path,
                other => panic!("unexpected operation {other:?}"),
            };
            assert!(path.starts_with("/spec/containers/0/resources"));
        }

        let patched = apply(&original, &patch);
        let container = &patched.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("nginx"));
        assert_eq!(
            container.resources.as_ref().unwrap().limits.as_ref().unwrap()["memory"],
            Quantity("2Gi".to_string())
        );
    }
}
