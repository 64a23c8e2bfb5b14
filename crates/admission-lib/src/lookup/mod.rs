//! Read-only collaborators the admission pipeline consults
//!
//! Every lookup is a single bounded attempt. Failures come back as
//! [`LookupError`] and are turned into admission signals by the caller;
//! nothing here retries.

mod cluster;
mod memory;

pub use cluster::{policy_api_resource, KubeLookups, DEFAULT_LOOKUP_TIMEOUT};
pub use memory::InMemoryStore;

use crate::controller::{ControllerKind, ControllerRef};
use crate::error::LookupError;
use crate::models::{AutoscalingPolicy, PodRecommendation, RangeConstraint};

pub use async_trait::async_trait;

/// Collaborator names used in logs, metrics and health reporting
pub mod collaborators {
    pub const POLICY_LISTER: &str = "policy_lister";
    pub const OWNER_LOOKUP: &str = "owner_lookup";
    pub const LIMIT_RANGE_LISTER: &str = "limit_range_lister";
    pub const RECOMMENDATION_SOURCE: &str = "recommendation_source";
}

/// Result of looking up the controller of an owner object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerChain {
    /// The object exists and is controlled by another object
    Controlled(ControllerRef),
    /// The object exists and has no controller
    Unowned,
    /// The object does not exist (anymore)
    NotFound,
}

/// Lists autoscaling policies visible in a namespace
#[async_trait]
pub trait PolicyLister: Send + Sync {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<AutoscalingPolicy>, LookupError>;
}

/// Resolves the controller of an owner object
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    async fn controller_of(
        &self,
        kind: &ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<OwnerChain, LookupError>;
}

/// Lists the resource range constraints of a namespace
#[async_trait]
pub trait LimitRangeLister: Send + Sync {
    async fn list_constraints(&self, namespace: &str) -> Result<Vec<RangeConstraint>, LookupError>;
}

/// Fetches the current recommendation for a policy
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn recommendation_for(
        &self,
        policy: &AutoscalingPolicy,
    ) -> Result<Option<PodRecommendation>, LookupError>;
}

/// Reads the recommendation the recommender stored in the policy status
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRecommendationSource;

#[async_trait]
impl RecommendationSource for StatusRecommendationSource {
    async fn recommendation_for(
        &self,
        policy: &AutoscalingPolicy,
    ) -> Result<Option<PodRecommendation>, LookupError> {
        Ok(policy
            .status
            .as_ref()
            .and_then(|s| s.recommendation.clone())
            .filter(|r| !r.container_recommendations.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerRecommendation, PolicyStatus};

    #[tokio::test]
    async fn test_status_source_reads_recommendation() {
        let mut policy = AutoscalingPolicy::default();
        let source = StatusRecommendationSource;
        assert!(source.recommendation_for(&policy).await.unwrap().is_none());

        policy.status = Some(PolicyStatus {
            recommendation: Some(PodRecommendation {
                container_recommendations: vec![ContainerRecommendation {
                    container_name: "app".to_string(),
                    ..Default::default()
                }],
            }),
        });
        let found = source.recommendation_for(&policy).await.unwrap().unwrap();
        assert_eq!(found.container_recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_status_source_treats_empty_recommendation_as_absent() {
        let policy = AutoscalingPolicy {
            status: Some(PolicyStatus {
                recommendation: Some(PodRecommendation::default()),
            }),
            ..Default::default()
        };
        let found = StatusRecommendationSource
            .recommendation_for(&policy)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
