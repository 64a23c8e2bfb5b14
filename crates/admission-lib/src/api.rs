//! HTTP surface: the mutating webhook plus health and Prometheus metrics

use crate::engine::AdmissionEngine;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::lookup::collaborators;
use crate::provider::ProviderOutcome;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Errors surfaced by the HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed to encode metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: AdmissionEngine,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(engine: AdmissionEngine, health_registry: HealthRegistry) -> Self {
        Self {
            engine,
            health_registry,
        }
    }
}

/// Handle a Pod admission review. Always allows; mutates when a policy applies.
async fn mutate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AdmissionReview<Pod>>, JsonRejection>,
) -> Json<AdmissionReview<DynamicObject>> {
    let review = match body {
        Ok(Json(review)) => review,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed admission review body");
            return Json(AdmissionResponse::invalid(rejection.body_text()).into_review());
        }
    };
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(admit(&state, &request).await.into_review())
}

async fn admit(state: &AppState, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    if request.operation != Operation::Create {
        debug!(uid = %request.uid, operation = ?request.operation, "Ignoring non-create admission");
        return AdmissionResponse::from(request);
    }
    let Some(submitted) = &request.object else {
        debug!(uid = %request.uid, "No pod in admission request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    // Pods created through controllers usually arrive without a namespace
    let mut pod = submitted.clone();
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = request.namespace.clone();
    }

    let outcome = state.engine.admit(&pod).await;
    state.health_registry.record_activity();
    update_lookup_health(&state.health_registry, outcome.outcome.as_ref()).await;

    if !outcome.is_mutating() {
        return AdmissionResponse::from(request);
    }
    match AdmissionResponse::from(request).with_patch(outcome.patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch, allowing unchanged");
            AdmissionResponse::from(request)
        }
    }
}

async fn update_lookup_health(registry: &HealthRegistry, outcome: Option<&ProviderOutcome>) {
    match outcome {
        Some(ProviderOutcome::Unavailable { collaborator })
            if collaborator == collaborators::POLICY_LISTER =>
        {
            registry
                .set_degraded(components::POLICY_LISTER, "policy lookup failed")
                .await;
        }
        Some(ProviderOutcome::UnknownBounds { .. }) => {
            registry.set_healthy(components::POLICY_LISTER).await;
            registry
                .set_degraded(components::LIMIT_RANGE_LISTER, "limit range lookup failed")
                .await;
        }
        Some(ProviderOutcome::Recommended(_)) => {
            registry.set_healthy(components::POLICY_LISTER).await;
            registry.set_healthy(components::LIMIT_RANGE_LISTER).await;
        }
        Some(_) => registry.set_healthy(components::POLICY_LISTER).await,
        None => {}
    }
}

/// Health check response: 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response: 200 if ready, 503 otherwise
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Result<impl IntoResponse, WebhookError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Router for the admission webhook
pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(mutate))
        .route("/mutate", post(mutate))
        .with_state(state)
}

/// Router for health probes and metrics
pub fn ops_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}
