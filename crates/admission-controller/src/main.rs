//! VPA admission controller
//!
//! Mutating webhook that applies autoscaling recommendations to Pods at
//! creation time, capped to policy and namespace bounds.

use admission_lib::{
    api::AppState,
    health::{components, HealthRegistry},
    lookup::{KubeLookups, StatusRecommendationSource},
    AdmissionEngine, CappingConfig, ControllerResolver, DefaultPodPreprocessor,
    LimitRangeResolver, ProviderDeps, RecommendationCapper, RecommendationProvider,
    StructuredLogger,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::AdmissionConfig::load(&cli)?;
    info!(
        webhook_address = %config.webhook_address,
        address = %config.address,
        lookup_timeout_ms = config.lookup_timeout_ms,
        "Admission controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WEBHOOK).await;
    health_registry.register(components::POLICY_LISTER).await;
    health_registry.register(components::LIMIT_RANGE_LISTER).await;

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(VERSION, config.allow_to_adjust_limits);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let lookups = Arc::new(KubeLookups::new(client, config.lookup_timeout()));

    let provider = RecommendationProvider::new(
        ProviderDeps {
            policies: lookups.clone(),
            controllers: ControllerResolver::new(lookups.clone()),
            ranges: LimitRangeResolver::new(lookups),
            recommendations: Arc::new(StatusRecommendationSource),
            preprocessor: Arc::new(DefaultPodPreprocessor),
        },
        RecommendationCapper::new(CappingConfig {
            allow_adjust_limits: config.allow_to_adjust_limits,
        }),
    );
    let engine = AdmissionEngine::new(provider, logger.clone());
    let state = Arc::new(AppState::new(engine, health_registry.clone()));

    let ops = tokio::spawn(server::serve_ops(config.address, state.clone()));
    let webhook = server::serve_webhook(config.webhook_address, config.tls(), state);

    health_registry.set_ready(true).await;

    tokio::select! {
        result = webhook => {
            if let Err(e) = &result {
                error!(error = %e, "Webhook server failed");
                health_registry.set_unhealthy(components::WEBHOOK, e.to_string()).await;
            }
            result?;
        }
        result = ops => {
            result.context("ops server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
        }
    }

    info!("Shutting down");
    Ok(())
}
