//! Kubernetes API backed collaborators
//!
//! Each lookup is one API request wrapped in a timeout. Not-found answers
//! are normal results; timeouts and transport failures become
//! [`LookupError`]s.

use super::{
    async_trait, collaborators, LimitRangeLister, OwnerChain, OwnerLookup, PolicyLister,
};
use crate::controller::{ControllerKind, ControllerRef};
use crate::error::LookupError;
use crate::models::{AutoscalingPolicy, RangeConstraint};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::LimitRange;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

const POLICY_GROUP: &str = "autoscaling.k8s.io";
const POLICY_VERSION: &str = "v1";
const POLICY_KIND: &str = "VerticalPodAutoscaler";

/// API resource descriptor for the dynamic policy API
pub fn policy_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        POLICY_GROUP,
        POLICY_VERSION,
        POLICY_KIND,
    ))
}

/// Convert a dynamic API object into a typed policy
pub(crate) fn policy_from_dynamic(
    object: &DynamicObject,
) -> Result<AutoscalingPolicy, serde_json::Error> {
    serde_json::to_value(object).and_then(serde_json::from_value)
}

/// Lookups served directly by the Kubernetes API server
#[derive(Clone)]
pub struct KubeLookups {
    client: Client,
    timeout: Duration,
}

impl KubeLookups {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Run one request under the lookup timeout
    async fn bounded<T, F>(&self, collaborator: &'static str, request: F) -> Result<T, LookupError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LookupError::Unavailable {
                collaborator,
                reason: e.to_string(),
            }),
            Err(_) => Err(LookupError::Timeout {
                collaborator,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl PolicyLister for KubeLookups {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<AutoscalingPolicy>, LookupError> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &policy_api_resource());
        let list = self
            .bounded(
                collaborators::POLICY_LISTER,
                api.list(&ListParams::default()),
            )
            .await?;

        let policies = list
            .items
            .iter()
            .filter_map(|object| match policy_from_dynamic(object) {
                Ok(policy) => Some(policy),
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        policy = ?object.metadata.name,
                        error = %e,
                        "Skipping policy that does not decode"
                    );
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(namespace = %namespace, count = policies.len(), "Listed policies");
        Ok(policies)
    }
}

#[async_trait]
impl OwnerLookup for KubeLookups {
    async fn controller_of(
        &self,
        kind: &ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<OwnerChain, LookupError> {
        let metadata = match kind {
            ControllerKind::ReplicaSet => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
                self.bounded(collaborators::OWNER_LOOKUP, api.get_opt(name))
                    .await?
                    .map(|rs| rs.metadata)
            }
            ControllerKind::Job => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                self.bounded(collaborators::OWNER_LOOKUP, api.get_opt(name))
                    .await?
                    .map(|job| job.metadata)
            }
            // only intermediate kinds are walked through
            _ => return Ok(OwnerChain::Unowned),
        };

        let Some(metadata) = metadata else {
            return Ok(OwnerChain::NotFound);
        };
        Ok(ControllerRef::from_owner_references(
            metadata.owner_references.as_deref().unwrap_or_default(),
        )
        .map(OwnerChain::Controlled)
        .unwrap_or(OwnerChain::Unowned))
    }
}

#[async_trait]
impl LimitRangeLister for KubeLookups {
    async fn list_constraints(&self, namespace: &str) -> Result<Vec<RangeConstraint>, LookupError> {
        let api: Api<LimitRange> = Api::namespaced(self.client.clone(), namespace);
        let list = self
            .bounded(
                collaborators::LIMIT_RANGE_LISTER,
                api.list(&ListParams::default()),
            )
            .await?;

        let constraints = list
            .items
            .iter()
            .flat_map(RangeConstraint::from_limit_range)
            .collect::<Vec<_>>();
        debug!(namespace = %namespace, count = constraints.len(), "Listed range constraints");
        Ok(constraints)
    }
}
