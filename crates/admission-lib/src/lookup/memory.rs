//! In-memory collaborator store
//!
//! Backs every lookup trait with canned data. Each collaborator can be
//! switched to "unreachable" to exercise the failure signals.

use super::{
    async_trait, collaborators, LimitRangeLister, OwnerChain, OwnerLookup, PolicyLister,
    RecommendationSource,
};
use crate::controller::ControllerKind;
use crate::error::LookupError;
use crate::models::{AutoscalingPolicy, PodRecommendation, RangeConstraint};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

type OwnerKey = (ControllerKind, String, String);

/// Canned lookups for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    policies: RwLock<HashMap<String, Vec<AutoscalingPolicy>>>,
    owners: RwLock<HashMap<OwnerKey, OwnerChain>>,
    constraints: RwLock<HashMap<String, Vec<RangeConstraint>>>,
    /// Recommendations keyed by (namespace, policy name); policies without
    /// an entry fall back to their status
    recommendations: RwLock<HashMap<(String, String), Option<PodRecommendation>>>,
    policies_unreachable: AtomicBool,
    owners_unreachable: AtomicBool,
    constraints_unreachable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_policy(&self, policy: AutoscalingPolicy) {
        let mut policies = self.policies.write().await;
        policies
            .entry(policy.namespace().to_string())
            .or_default()
            .push(policy);
    }

    pub async fn set_owner(
        &self,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        chain: OwnerChain,
    ) {
        let mut owners = self.owners.write().await;
        owners.insert((kind, namespace.to_string(), name.to_string()), chain);
    }

    pub async fn add_constraint(&self, namespace: &str, constraint: RangeConstraint) {
        let mut constraints = self.constraints.write().await;
        constraints
            .entry(namespace.to_string())
            .or_default()
            .push(constraint);
    }

    pub async fn set_recommendation(
        &self,
        namespace: &str,
        policy_name: &str,
        recommendation: Option<PodRecommendation>,
    ) {
        let mut recommendations = self.recommendations.write().await;
        recommendations.insert(
            (namespace.to_string(), policy_name.to_string()),
            recommendation,
        );
    }

    pub fn set_policies_unreachable(&self, unreachable: bool) {
        self.policies_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_owners_unreachable(&self, unreachable: bool) {
        self.owners_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_constraints_unreachable(&self, unreachable: bool) {
        self.constraints_unreachable
            .store(unreachable, Ordering::SeqCst);
    }
}

fn unreachable(collaborator: &'static str) -> LookupError {
    LookupError::Unavailable {
        collaborator,
        reason: "store unreachable".to_string(),
    }
}

#[async_trait]
impl PolicyLister for InMemoryStore {
    async fn list_policies(&self, namespace: &str) -> Result<Vec<AutoscalingPolicy>, LookupError> {
        if self.policies_unreachable.load(Ordering::SeqCst) {
            return Err(unreachable(collaborators::POLICY_LISTER));
        }
        let policies = self.policies.read().await;
        Ok(policies.get(namespace).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl OwnerLookup for InMemoryStore {
    async fn controller_of(
        &self,
        kind: &ControllerKind,
        namespace: &str,
        name: &str,
    ) -> Result<OwnerChain, LookupError> {
        if self.owners_unreachable.load(Ordering::SeqCst) {
            return Err(unreachable(collaborators::OWNER_LOOKUP));
        }
        let owners = self.owners.read().await;
        Ok(owners
            .get(&(kind.clone(), namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or(OwnerChain::NotFound))
    }
}

#[async_trait]
impl LimitRangeLister for InMemoryStore {
    async fn list_constraints(&self, namespace: &str) -> Result<Vec<RangeConstraint>, LookupError> {
        if self.constraints_unreachable.load(Ordering::SeqCst) {
            return Err(unreachable(collaborators::LIMIT_RANGE_LISTER));
        }
        let constraints = self.constraints.read().await;
        Ok(constraints.get(namespace).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RecommendationSource for InMemoryStore {
    async fn recommendation_for(
        &self,
        policy: &AutoscalingPolicy,
    ) -> Result<Option<PodRecommendation>, LookupError> {
        let recommendations = self.recommendations.read().await;
        let key = (policy.namespace().to_string(), policy.name().to_string());
        match recommendations.get(&key) {
            Some(recommendation) => Ok(recommendation.clone()),
            None => super::StatusRecommendationSource
                .recommendation_for(policy)
                .await,
        }
    }
}
