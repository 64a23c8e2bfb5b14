//! Admission library for vertical pod autoscaling
//!
//! This crate provides the decision engine behind the mutating webhook:
//! - Controller and policy resolution for incoming Pods
//! - Namespace resource range resolution
//! - Recommendation capping and JSON patch construction
//! - Health checks, metrics and the HTTP surface

pub mod api;
pub mod capping;
pub mod controller;
pub mod engine;
pub mod error;
pub mod health;
pub mod limitrange;
pub mod lookup;
pub mod matcher;
pub mod models;
pub mod observability;
pub mod patch;
pub mod preprocess;
pub mod provider;
pub mod quantity;

pub use capping::{CappingConfig, RecommendationCapper};
pub use controller::{ControllerKind, ControllerRef, ControllerResolver};
pub use engine::{AdmissionEngine, AdmissionOutcome};
pub use error::{LookupError, Signal};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use limitrange::{LimitRangeResolver, RangeLookup};
pub use observability::{AdmissionMetrics, StructuredLogger};
pub use preprocess::{DefaultPodPreprocessor, PodPreprocessor};
pub use provider::{ProviderDeps, ProviderOutcome, RecommendationProvider};
pub use quantity::ResourceAmount;
