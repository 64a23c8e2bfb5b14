//! Liveness and readiness state for the admission controller
//!
//! The webhook itself and each lookup collaborator report a status. A failing
//! collaborator degrades the controller but admissions are still answered,
//! so only an unhealthy component fails the probes.

use crate::lookup::collaborators;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing lookups, admissions still answered
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the components
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    /// Unix timestamp of the last admission handled, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked components
pub mod components {
    use super::collaborators;

    pub const WEBHOOK: &str = "webhook";
    pub const POLICY_LISTER: &str = collaborators::POLICY_LISTER;
    pub const LIMIT_RANGE_LISTER: &str = collaborators::LIMIT_RANGE_LISTER;
}

/// Shared health state, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    serving: Arc<AtomicBool>,
    last_activity: Arc<AtomicI64>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let health = ComponentHealth {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        };
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    /// Mark the webhook listener as serving (or not)
    pub async fn set_ready(&self, ready: bool) {
        self.serving.store(ready, Ordering::SeqCst);
    }

    /// Record that an admission was handled
    pub fn record_activity(&self) {
        self.last_activity
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Option<i64> {
        match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components,
            last_activity_timestamp: self.last_activity(),
        }
    }

    /// Ready once serving and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.serving.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("webhook not yet serving".to_string()),
            };
        }

        let unhealthy: Vec<String> = self
            .components
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}
