//! Reconciliation logic for Distribution CRDs.
//!
//! One pass renders the template tree for the instance, applies the unit
//! through [`apply::ResourceApplier`], then refreshes the status from the
//! live workload:
//! - `render`: spec to render request (image, mappings, excluded kinds)
//! - `apply`: create / patch / skip per document
//! - `status`: readiness, server probes, phase and conditions
//! - `reference_index`: shared ConfigMap to referencing instances

pub mod apply;
pub mod reference_index;
pub mod render;
pub mod status;

#[cfg(test)]
mod reconcile_test;

use crate::backoff::BackoffTracker;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::telemetry::Metrics;
use apply::{InstanceIdentity, ResourceApplier};
use cluster_client::{ClusterClient, ClusterError, ScopeResolver};
use crds::{API_GROUP, API_VERSION, Distribution, DistributionPhase, DistributionStatus, KIND};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use manifest_engine::{FileSystem, ObjectIdentity, ReconciliationUnit, render as render_unit};
use reference_index::{ObjectKey, ReferenceIndex};
use status::{ServerProbe, StatusRefresher, StatusTargets, build_status, failed_status};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Requeue interval once the server is ready
const READY_RESYNC: Duration = Duration::from_secs(300);
/// Requeue interval while the server is still coming up
const PENDING_RESYNC: Duration = Duration::from_secs(30);

/// Reconciles Distribution resources.
pub struct Reconciler {
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) scope: Arc<dyn ScopeResolver>,
    pub(crate) templates: Arc<dyn FileSystem>,
    pub(crate) probe: Arc<dyn ServerProbe>,
    pub(crate) index: Arc<ReferenceIndex>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config: OperatorConfig,
    backoff: BackoffTracker,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        scope: Arc<dyn ScopeResolver>,
        templates: Arc<dyn FileSystem>,
        probe: Arc<dyn ServerProbe>,
        index: Arc<ReferenceIndex>,
        metrics: Arc<Metrics>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            cluster,
            scope,
            templates,
            probe,
            index,
            metrics,
            config,
            backoff: BackoffTracker::new(),
        }
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    /// Runs one pass for a Distribution under the reconcile deadline.
    ///
    /// Failures other than write conflicts are summarised into a `Failed`
    /// status before being returned for backoff.
    pub async fn reconcile_distribution(&self, distribution: &Distribution) -> Result<Action, ControllerError> {
        let key = ObjectKey::new(distribution.namespace_or_default(), distribution.name_any());

        if distribution.metadata.deletion_timestamp.is_some() {
            debug!("Distribution {} is being deleted, leaving cleanup to the garbage collector", key);
            self.index.forget(&key);
            return Ok(Action::await_change());
        }
        self.index.observe(key.clone());
        info!("Reconciling Distribution {}", key);

        let started = Instant::now();
        let deadline = self.config.reconcile_timeout;
        let result = match tokio::time::timeout(deadline, self.run_pass(distribution)).await {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Timeout(deadline)),
        };
        self.metrics.observe(started.elapsed(), result.as_ref().err());

        match result {
            Ok(phase) => {
                self.backoff.record_success(&key.to_string());
                info!("Distribution {} reconciled: {}", key, phase.as_str());
                let resync = if phase == DistributionPhase::Ready { READY_RESYNC } else { PENDING_RESYNC };
                Ok(Action::requeue(resync))
            }
            Err(e) if e.is_conflict() => {
                debug!("Write conflict reconciling Distribution {}: {}", key, e);
                Err(e)
            }
            Err(e) => {
                error!("Failed to reconcile Distribution {}: {}", key, e);
                let status = failed_status(distribution.status.as_ref(), e.summary());
                if let Err(patch_error) = self.write_status(distribution, &status).await {
                    error!("Failed to update Distribution {} error status: {}", key, patch_error);
                }
                Err(e)
            }
        }
    }

    async fn run_pass(&self, distribution: &Distribution) -> Result<DistributionPhase, ControllerError> {
        let instance = instance_identity(distribution)?;

        let request = render::build_request(distribution, &self.config)?;
        let unit = render_unit(self.templates.as_ref(), &self.config.manifests_path, &request)?;
        debug!(
            "Rendered {} documents for {} ({} kinds excluded)",
            unit.documents().len(),
            instance,
            unit.excluded_kinds().len()
        );

        let report = ResourceApplier::new(self.cluster.as_ref(), self.scope.as_ref(), &instance)
            .apply(&unit)
            .await?;
        info!(
            "Applied unit for {}: {} created, {} patched, {} skipped",
            instance,
            report.created(),
            report.patched(),
            report.skipped()
        );

        let observed = StatusRefresher::new(self.cluster.as_ref(), self.probe.as_ref(), self.config.probe_timeout)
            .observe(&status_targets(distribution, &unit))
            .await?;
        let status = build_status(distribution.status.as_ref(), &observed);
        self.write_status(distribution, &status).await?;
        Ok(status.phase)
    }

    /// Merge-patches the status subresource when it changed
    async fn write_status(&self, distribution: &Distribution, status: &DistributionStatus) -> Result<(), ControllerError> {
        if distribution.status.as_ref() == Some(status) {
            debug!("Status of Distribution {} unchanged", distribution.name_any());
            return Ok(());
        }
        let patch = serde_json::to_value(status).map_err(ClusterError::from)?;
        self.cluster
            .patch_status(&status_identity(distribution), &patch)
            .await?;
        if status.phase == DistributionPhase::Failed {
            warn!(
                "Distribution {}/{} marked Failed: {}",
                distribution.namespace_or_default(),
                distribution.name_any(),
                status.message.as_deref().unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Identity used for owner links and field ownership
pub fn instance_identity(distribution: &Distribution) -> Result<InstanceIdentity, ControllerError> {
    let uid = distribution
        .uid()
        .ok_or_else(|| ControllerError::InvalidSpec("Distribution has no uid yet".to_string()))?;
    Ok(InstanceIdentity {
        api_version: format!("{API_GROUP}/{API_VERSION}"),
        kind: KIND.to_string(),
        namespace: distribution.namespace_or_default(),
        name: distribution.name_any(),
        uid,
    })
}

fn status_identity(distribution: &Distribution) -> ObjectIdentity {
    ObjectIdentity {
        gvk: manifest_engine::GroupVersionKind::new(API_GROUP, API_VERSION, KIND),
        namespace: Some(distribution.namespace_or_default()),
        name: distribution.name_any(),
    }
}

/// Workload, service and claim as rendered for this instance
fn status_targets(distribution: &Distribution, unit: &ReconciliationUnit) -> StatusTargets {
    StatusTargets {
        deployment: unit.find_kind("Deployment").map(|d| d.identity()),
        service: unit.find_kind("Service").map(|d| d.identity()),
        claim: unit.find_kind("PersistentVolumeClaim").map(|d| d.identity()),
        port: distribution.container_port(),
        desired_replicas: distribution.spec.replicas,
    }
}
