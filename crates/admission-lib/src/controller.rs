//! Top-level controller resolution for Pods
//!
//! Walks controller owner references from a Pod up through intermediate
//! kinds (ReplicaSet -> Deployment, Job -> CronJob). The walk is bounded by
//! [`MAX_OWNER_HOPS`] so malformed ownership cycles cannot stall admission.

use crate::lookup::{OwnerChain, OwnerLookup};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum number of owner references followed from the Pod
pub const MAX_OWNER_HOPS: usize = 2;

/// Controller kinds the resolver knows about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    ReplicationController,
    Other(String),
}

impl ControllerKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Deployment" => ControllerKind::Deployment,
            "ReplicaSet" => ControllerKind::ReplicaSet,
            "StatefulSet" => ControllerKind::StatefulSet,
            "DaemonSet" => ControllerKind::DaemonSet,
            "Job" => ControllerKind::Job,
            "CronJob" => ControllerKind::CronJob,
            "ReplicationController" => ControllerKind::ReplicationController,
            other => ControllerKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControllerKind::Deployment => "Deployment",
            ControllerKind::ReplicaSet => "ReplicaSet",
            ControllerKind::StatefulSet => "StatefulSet",
            ControllerKind::DaemonSet => "DaemonSet",
            ControllerKind::Job => "Job",
            ControllerKind::CronJob => "CronJob",
            ControllerKind::ReplicationController => "ReplicationController",
            ControllerKind::Other(kind) => kind,
        }
    }

    /// Kinds that are usually created by another controller
    pub fn is_intermediate(&self) -> bool {
        matches!(self, ControllerKind::ReplicaSet | ControllerKind::Job)
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved controller, identified by kind and name within the Pod's namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerRef {
    pub kind: ControllerKind,
    pub name: String,
}

impl ControllerRef {
    pub fn new(kind: ControllerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The owner reference flagged as controller, if any
    pub fn from_owner_references(refs: &[OwnerReference]) -> Option<Self> {
        refs.iter()
            .find(|r| r.controller == Some(true))
            .map(|r| Self::new(ControllerKind::from_kind(&r.kind), r.name.clone()))
    }
}

impl fmt::Display for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Resolves the top-level controller of a Pod
#[derive(Clone)]
pub struct ControllerResolver {
    owners: Arc<dyn OwnerLookup>,
}

impl ControllerResolver {
    pub fn new(owners: Arc<dyn OwnerLookup>) -> Self {
        Self { owners }
    }

    /// Returns `None` for unowned Pods, missing owners, lookup failures and
    /// chains that are still intermediate after [`MAX_OWNER_HOPS`].
    pub async fn resolve(&self, pod: &Pod) -> Option<ControllerRef> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let refs = pod.metadata.owner_references.as_deref().unwrap_or_default();
        let mut current = ControllerRef::from_owner_references(refs)?;
        let mut hops = 1;

        while current.kind.is_intermediate() {
            if hops >= MAX_OWNER_HOPS {
                warn!(
                    namespace = %namespace,
                    owner = %current,
                    hops = hops,
                    "Owner chain exceeds hop limit, treating Pod as unowned"
                );
                return None;
            }

            match self
                .owners
                .controller_of(&current.kind, namespace, &current.name)
                .await
            {
                Ok(OwnerChain::Controlled(owner)) => {
                    debug!(owner = %current, controller = %owner, "Followed owner reference");
                    current = owner;
                    hops += 1;
                }
                Ok(OwnerChain::Unowned) => break,
                Ok(OwnerChain::NotFound) => {
                    debug!(
                        namespace = %namespace,
                        owner = %current,
                        "Intermediate owner not found"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        owner = %current,
                        error = %e,
                        "Owner lookup failed"
                    );
                    return None;
                }
            }
        }

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::InMemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn owner(kind: &str, name: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("{name}-uid"),
            controller: Some(controller),
            ..Default::default()
        }
    }

    fn pod_owned_by(refs: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-abc".to_string()),
                namespace: Some("default".to_string()),
                owner_references: Some(refs),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_controller_kind_round_trip() {
        assert_eq!(ControllerKind::from_kind("Deployment"), ControllerKind::Deployment);
        assert_eq!(
            ControllerKind::from_kind("Rollout"),
            ControllerKind::Other("Rollout".to_string())
        );
        assert_eq!(ControllerKind::from_kind("Rollout").as_str(), "Rollout");
        assert!(ControllerKind::ReplicaSet.is_intermediate());
        assert!(!ControllerKind::StatefulSet.is_intermediate());
    }

    #[tokio::test]
    async fn test_unowned_pod_resolves_to_none() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ControllerResolver::new(store);

        assert_eq!(resolver.resolve(&pod_owned_by(vec![])).await, None);
        // owner without controller flag
        let pod = pod_owned_by(vec![owner("StatefulSet", "db", false)]);
        assert_eq!(resolver.resolve(&pod).await, None);
    }

    #[tokio::test]
    async fn test_direct_controller() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("StatefulSet", "db", true)]);
        assert_eq!(
            resolver.resolve(&pod).await,
            Some(ControllerRef::new(ControllerKind::StatefulSet, "db"))
        );
    }

    #[tokio::test]
    async fn test_replica_set_resolves_to_deployment() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_owner(
                ControllerKind::ReplicaSet,
                "default",
                "web-5d8f",
                OwnerChain::Controlled(ControllerRef::new(ControllerKind::Deployment, "web")),
            )
            .await;
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("ReplicaSet", "web-5d8f", true)]);
        assert_eq!(
            resolver.resolve(&pod).await,
            Some(ControllerRef::new(ControllerKind::Deployment, "web"))
        );
    }

    #[tokio::test]
    async fn test_bare_replica_set_is_top_level() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_owner(ControllerKind::ReplicaSet, "default", "bare", OwnerChain::Unowned)
            .await;
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("ReplicaSet", "bare", true)]);
        assert_eq!(
            resolver.resolve(&pod).await,
            Some(ControllerRef::new(ControllerKind::ReplicaSet, "bare"))
        );
    }

    #[tokio::test]
    async fn test_missing_intermediate_owner_is_none() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("ReplicaSet", "gone", true)]);
        assert_eq!(resolver.resolve(&pod).await, None);
    }

    #[tokio::test]
    async fn test_hop_limit_stops_cycles() {
        let store = Arc::new(InMemoryStore::new());
        // a -> b -> a, both intermediate
        store
            .set_owner(
                ControllerKind::ReplicaSet,
                "default",
                "a",
                OwnerChain::Controlled(ControllerRef::new(ControllerKind::ReplicaSet, "b")),
            )
            .await;
        store
            .set_owner(
                ControllerKind::ReplicaSet,
                "default",
                "b",
                OwnerChain::Controlled(ControllerRef::new(ControllerKind::ReplicaSet, "a")),
            )
            .await;
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("ReplicaSet", "a", true)]);
        assert_eq!(resolver.resolve(&pod).await, None);
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_is_none() {
        let store = Arc::new(InMemoryStore::new());
        store.set_owners_unreachable(true);
        let resolver = ControllerResolver::new(store);

        let pod = pod_owned_by(vec![owner("Job", "nightly-123", true)]);
        assert_eq!(resolver.resolve(&pod).await, None);
    }
}
