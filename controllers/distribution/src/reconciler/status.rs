//! Status refresh for a Distribution.
//!
//! Reads the managed workload, service and claim, probes the server when the
//! workload is fully ready, and derives phase and conditions from what it
//! found.

use async_trait::async_trait;
use chrono::Utc;
use cluster_client::{ClusterClient, ClusterError};
use crds::{
    ConditionType, DistributionCondition, DistributionPhase, DistributionStatus, set_condition,
};
use manifest_engine::{ObjectIdentity, ResourceDocument};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const HEALTH_PATH: &str = "/v1/health";
pub const VERSION_PATH: &str = "/v1/version";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound calls to a running server
#[async_trait]
pub trait ServerProbe: Send + Sync {
    /// `true` when the health endpoint answers 200
    async fn health(&self, base_url: &str) -> Result<bool, ProbeError>;

    /// Version string the server reports
    async fn version(&self, base_url: &str) -> Result<String, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    version: String,
}

/// `ServerProbe` over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerProbe for HttpProbe {
    async fn health(&self, base_url: &str) -> Result<bool, ProbeError> {
        let response = self.client.get(format!("{base_url}{HEALTH_PATH}")).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    async fn version(&self, base_url: &str) -> Result<String, ProbeError> {
        let response = self.client.get(format!("{base_url}{VERSION_PATH}")).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        let info: VersionInfo = response.json().await?;
        Ok(info.version)
    }
}

/// In-cluster URL of the server behind `service`
pub fn server_url(service: &str, namespace: &str, port: i32) -> String {
    format!("http://{service}.{namespace}.svc.cluster.local:{port}")
}

/// Managed objects whose live state feeds the status
#[derive(Debug, Clone)]
pub struct StatusTargets {
    pub deployment: Option<ObjectIdentity>,
    pub service: Option<ObjectIdentity>,
    pub claim: Option<ObjectIdentity>,
    pub port: i32,
    pub desired_replicas: i32,
}

/// What the refresh observed, before it is folded into a status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub workload_found: bool,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub desired_replicas: i32,
    pub service_found: bool,
    /// Claim phase; `None` when no claim is managed
    pub claim_phase: Option<String>,
    /// Health probe answer; `None` when the server was not probed
    pub healthy: Option<bool>,
    pub version: Option<String>,
}

impl Observation {
    fn fully_ready(&self) -> bool {
        self.workload_found && self.ready_replicas > 0 && self.ready_replicas == self.desired_replicas
    }
}

/// Phase and message for an observation
pub fn derive_phase(observed: &Observation) -> (DistributionPhase, String) {
    if !observed.workload_found {
        return (DistributionPhase::Pending, "Waiting for the server deployment".to_string());
    }
    if observed.ready_replicas == 0 {
        return (
            DistributionPhase::Pending,
            format!("0/{} replicas ready", observed.desired_replicas),
        );
    }
    if !observed.fully_ready() {
        return (
            DistributionPhase::Progressing,
            format!(
                "{}/{} replicas ready",
                observed.ready_replicas, observed.desired_replicas
            ),
        );
    }
    match observed.healthy {
        Some(true) => (DistributionPhase::Ready, "Server is ready".to_string()),
        _ => (DistributionPhase::Progressing, "Server health check failing".to_string()),
    }
}

/// Folds an observation into the previous status
pub fn build_status(current: Option<&DistributionStatus>, observed: &Observation) -> DistributionStatus {
    let now = Utc::now();
    let mut status = current.cloned().unwrap_or_default();
    let (phase, message) = derive_phase(observed);
    status.phase = phase;
    status.message = Some(message);
    status.ready = phase == DistributionPhase::Ready;
    status.available_replicas = observed.available_replicas;
    if observed.version.is_some() {
        status.version = observed.version.clone();
    }

    let deployment = if observed.fully_ready() {
        DistributionCondition::new(ConditionType::DeploymentReady, true, "DeploymentReady", "Deployment is ready")
    } else if observed.workload_found {
        DistributionCondition::new(
            ConditionType::DeploymentReady,
            false,
            "DeploymentPending",
            format!("{}/{} replicas ready", observed.ready_replicas, observed.desired_replicas),
        )
    } else {
        DistributionCondition::new(ConditionType::DeploymentReady, false, "DeploymentPending", "Deployment not found")
    };
    set_condition(&mut status.conditions, deployment, now);

    let health = match observed.healthy {
        Some(true) => DistributionCondition::new(ConditionType::HealthCheck, true, "HealthCheckPassed", "Health check passed"),
        Some(false) => DistributionCondition::new(ConditionType::HealthCheck, false, "HealthCheckFailed", "Health check failed"),
        None => DistributionCondition::new(ConditionType::HealthCheck, false, "HealthCheckFailed", "Server not ready"),
    };
    set_condition(&mut status.conditions, health, now);

    let service = if observed.service_found {
        DistributionCondition::new(ConditionType::ServiceReady, true, "ServiceReady", "Service is ready")
    } else {
        DistributionCondition::new(ConditionType::ServiceReady, false, "ServiceFailed", "Service not found")
    };
    set_condition(&mut status.conditions, service, now);

    if let Some(phase) = &observed.claim_phase {
        let storage = if phase == "Bound" {
            DistributionCondition::new(ConditionType::StorageReady, true, "StorageReady", "Storage is ready")
        } else {
            DistributionCondition::new(ConditionType::StorageReady, false, "StorageFailed", format!("Claim is {phase}"))
        };
        set_condition(&mut status.conditions, storage, now);
    }

    status
}

/// Status written after a failed pass; conditions are left as they were
pub fn failed_status(current: Option<&DistributionStatus>, message: String) -> DistributionStatus {
    let mut status = current.cloned().unwrap_or_default();
    status.phase = DistributionPhase::Failed;
    status.message = Some(message);
    status.ready = false;
    status
}

fn int_at(doc: &ResourceDocument, pointer: &str) -> Option<i32> {
    doc.as_value()
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

/// Gathers an [`Observation`] from the cluster and the server
pub struct StatusRefresher<'a> {
    client: &'a dyn ClusterClient,
    probe: &'a dyn ServerProbe,
    probe_timeout: Duration,
}

impl<'a> StatusRefresher<'a> {
    pub fn new(client: &'a dyn ClusterClient, probe: &'a dyn ServerProbe, probe_timeout: Duration) -> Self {
        Self { client, probe, probe_timeout }
    }

    pub async fn observe(&self, targets: &StatusTargets) -> Result<Observation, ClusterError> {
        let mut observed = Observation {
            desired_replicas: targets.desired_replicas,
            ..Observation::default()
        };

        if let Some(id) = &targets.deployment
            && let Some(live) = self.client.get(id).await?
        {
            observed.workload_found = true;
            observed.ready_replicas = int_at(&live, "/status/readyReplicas").unwrap_or(0);
            observed.available_replicas = int_at(&live, "/status/availableReplicas").unwrap_or(0);
        }

        if let Some(id) = &targets.claim {
            let phase = self
                .client
                .get(id)
                .await?
                .and_then(|live| {
                    live.as_value()
                        .pointer("/status/phase")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "Pending".to_string());
            observed.claim_phase = Some(phase);
        }

        let service = match &targets.service {
            Some(id) => self.client.get(id).await?.map(|_| id.clone()),
            None => None,
        };
        observed.service_found = service.is_some();

        if observed.fully_ready()
            && let Some(service) = service
        {
            let url = server_url(
                &service.name,
                service.namespace.as_deref().unwrap_or("default"),
                targets.port,
            );
            let (healthy, version) = self.probe_server(&url).await;
            observed.healthy = Some(healthy);
            observed.version = version;
        }
        Ok(observed)
    }

    /// Health and version concurrently, each under its own deadline
    async fn probe_server(&self, url: &str) -> (bool, Option<String>) {
        let limit = self.probe_timeout;
        let (health, version) = tokio::join!(
            tokio::time::timeout(limit, self.probe.health(url)),
            tokio::time::timeout(limit, self.probe.version(url)),
        );

        let healthy = match health.unwrap_or(Err(ProbeError::Timeout(limit))) {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Health check against {} failed: {}", url, e);
                false
            }
        };
        let version = match version.unwrap_or(Err(ProbeError::Timeout(limit))) {
            Ok(version) => Some(version),
            Err(e) => {
                debug!("Version query against {} failed: {}", url, e);
                None
            }
        };
        (healthy, version)
    }
}
