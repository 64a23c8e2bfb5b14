//! Pod normalization before matching and capping

use k8s_openapi::api::core::v1::{Pod, ResourceRequirements};

/// Normalizes a Pod so later stages can read container resources without
/// presence checks. Implementations must be idempotent.
pub trait PodPreprocessor: Send + Sync {
    fn process(&self, pod: &Pod) -> Pod;
}

/// Gives every container an empty `resources.requests` and `resources.limits`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPodPreprocessor;

impl PodPreprocessor for DefaultPodPreprocessor {
    fn process(&self, pod: &Pod) -> Pod {
        let mut pod = pod.clone();
        if let Some(spec) = pod.spec.as_mut() {
            for container in &mut spec.containers {
                let resources = container
                    .resources
                    .get_or_insert_with(ResourceRequirements::default);
                resources.requests.get_or_insert_with(Default::default);
                resources.limits.get_or_insert_with(Default::default);
            }
        }
        pod
    }
}
