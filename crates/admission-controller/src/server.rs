//! Listeners for the webhook and the ops endpoints

use admission_lib::api::{ops_router, webhook_router, AppState};
use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve health probes and metrics over plain HTTP
pub async fn serve_ops(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let app = ops_router(state);

    info!(addr = %addr, "Starting ops server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind ops address {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the admission webhook, over TLS when a certificate is configured
pub async fn serve_webhook(
    addr: SocketAddr,
    tls: Option<(&Path, &Path)>,
    state: Arc<AppState>,
) -> Result<()> {
    let app = webhook_router(state);

    match tls {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("failed to load TLS material from {}", cert.display()))?;

            info!(addr = %addr, "Starting webhook server with TLS");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!(addr = %addr, "No TLS certificate configured, serving webhook over plain HTTP");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind webhook address {addr}"))?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
