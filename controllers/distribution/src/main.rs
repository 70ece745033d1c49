//! Distribution Controller
//!
//! Reconciles `Distribution` CRDs into a model-serving deployment: renders
//! the layered template tree for each instance, applies it with ownership
//! safety, and reports readiness and server health on the status.

mod backoff;
mod config;
mod controller;
mod error;
mod reconciler;
mod telemetry;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Pin the crypto provider before any TLS client is built
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting Distribution Controller");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Manifests: {}", config.manifests_path.display());
    info!("  Distributions: {}", config.images.len());
    info!("  Network policy by default: {}", config.enable_network_policy);
    info!("  Reconcile timeout: {:?}", config.reconcile_timeout);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
