//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler to
//! the cluster and runs the watchers and the telemetry endpoint.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::reference_index::ReferenceIndex;
use crate::reconciler::status::HttpProbe;
use crate::telemetry::{self, Metrics};
use crate::watcher::Watcher;
use cluster_client::KubeClusterClient;
use futures::channel::mpsc;
use kube::Client;
use manifest_engine::DiskFs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Distribution management.
#[derive(Debug)]
pub struct Controller {
    distribution_watcher: JoinHandle<Result<(), ControllerError>>,
    config_map_watcher: JoinHandle<Result<(), ControllerError>>,
    telemetry: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Distribution Controller");

        let kube_client = Client::try_default().await?;
        let cluster = Arc::new(KubeClusterClient::new(kube_client.clone()));
        let metrics = Arc::new(Metrics::new()?);
        let index = Arc::new(ReferenceIndex::for_cluster(cluster.clone(), config.watch_namespace.clone()));

        let namespace = config.watch_namespace.clone();
        let metrics_addr = config.metrics_addr;
        let reconciler = Arc::new(Reconciler::new(
            cluster.clone(),
            cluster,
            Arc::new(DiskFs),
            Arc::new(HttpProbe::new()),
            index,
            Arc::clone(&metrics),
            config,
        ));

        let (instance_tx, instance_rx) = mpsc::unbounded();
        let (resync_tx, resync_rx) = mpsc::unbounded();
        let watcher = Arc::new(Watcher::new(reconciler, kube_client, namespace));

        let distribution_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_distributions(instance_rx, resync_rx).await })
        };
        let config_map_watcher =
            tokio::spawn(async move { watcher.watch_config_maps(instance_tx, resync_tx).await });

        let ready = Arc::new(AtomicBool::new(false));
        let telemetry = tokio::spawn(telemetry::serve(metrics_addr, metrics, Arc::clone(&ready)));
        ready.store(true, Ordering::SeqCst);

        Ok(Self {
            distribution_watcher,
            config_map_watcher,
            telemetry,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Distribution Controller running");

        // Wait for any task to exit (they should run forever)
        tokio::select! {
            result = &mut self.distribution_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Distribution watcher panicked: {}", e)))??;
            }
            result = &mut self.config_map_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ConfigMap watcher panicked: {}", e)))??;
            }
            result = &mut self.telemetry => {
                result.map_err(|e| ControllerError::Watch(format!("Telemetry server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
