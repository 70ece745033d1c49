//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::config::{DistributionImages, OperatorConfig};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::reconciler::apply::InstanceIdentity;
#[cfg(test)]
use crate::reconciler::reference_index::ReferenceIndex;
#[cfg(test)]
use crate::reconciler::status::{ProbeError, ServerProbe};
#[cfg(test)]
use crate::telemetry::Metrics;
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use cluster_client::MockClusterClient;
#[cfg(test)]
use crds::Distribution;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use manifest_engine::{MemoryFs, ReconciliationUnit, ResourceDocument};
#[cfg(test)]
use serde_json::{Value, json};
#[cfg(test)]
use std::collections::{BTreeMap, BTreeSet};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::time::Duration;

/// Helper to create a test Distribution with a uid
#[cfg(test)]
pub fn create_test_distribution(name: &str, namespace: &str, spec: Value) -> Distribution {
    Distribution {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        spec: serde_json::from_value(spec).expect("valid Distribution spec"),
        status: None,
    }
}

/// Distribution object as the API server would return it, referencing
/// `user_config` as its shared configuration
#[cfg(test)]
pub fn distribution_value(name: &str, namespace: &str, user_config: Value) -> Value {
    json!({
        "apiVersion": "distro.microscaler.io/v1alpha1",
        "kind": "Distribution",
        "metadata": { "name": name, "namespace": namespace, "uid": format!("uid-{name}") },
        "spec": {
            "server": {
                "distribution": { "name": "starter" },
                "userConfig": user_config
            }
        }
    })
}

#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    let images = BTreeMap::from([
        ("starter".to_string(), "registry.local/distribution:starter".to_string()),
        ("remote".to_string(), "registry.local/distribution:remote".to_string()),
    ]);
    OperatorConfig {
        manifests_path: "manifests".into(),
        images: DistributionImages::new(images),
        ..OperatorConfig::default()
    }
}

/// The shipped template tree, loaded into memory under `manifests/`
#[cfg(test)]
pub fn test_templates() -> MemoryFs {
    MemoryFs::new()
        .with_file(
            "manifests/default/kustomization.yaml",
            include_str!("../../../manifests/default/kustomization.yaml"),
        )
        .with_file(
            "manifests/base/kustomization.yaml",
            include_str!("../../../manifests/base/kustomization.yaml"),
        )
        .with_file(
            "manifests/base/serviceaccount.yaml",
            include_str!("../../../manifests/base/serviceaccount.yaml"),
        )
        .with_file(
            "manifests/base/deployment.yaml",
            include_str!("../../../manifests/base/deployment.yaml"),
        )
        .with_file(
            "manifests/base/service.yaml",
            include_str!("../../../manifests/base/service.yaml"),
        )
        .with_file(
            "manifests/base/pvc.yaml",
            include_str!("../../../manifests/base/pvc.yaml"),
        )
        .with_file(
            "manifests/base/networkpolicy.yaml",
            include_str!("../../../manifests/base/networkpolicy.yaml"),
        )
        .with_file(
            "manifests/base/scc-binding.yaml",
            include_str!("../../../manifests/base/scc-binding.yaml"),
        )
}

#[cfg(test)]
pub fn doc(value: Value) -> ResourceDocument {
    ResourceDocument::from_value(value).expect("valid document")
}

/// The instance most applier tests act for
#[cfg(test)]
pub fn test_instance() -> InstanceIdentity {
    InstanceIdentity {
        api_version: "distro.microscaler.io/v1alpha1".to_string(),
        kind: "Distribution".to_string(),
        namespace: "serving".to_string(),
        name: "llm".to_string(),
        uid: "uid-llm".to_string(),
    }
}

/// Controller owner reference pointing at `instance`
#[cfg(test)]
pub fn owned_by(instance: &InstanceIdentity) -> Value {
    json!({
        "apiVersion": instance.api_version,
        "kind": instance.kind,
        "name": instance.name,
        "uid": instance.uid,
        "controller": true,
        "blockOwnerDeletion": true
    })
}

#[cfg(test)]
pub fn test_unit(documents: Vec<ResourceDocument>) -> ReconciliationUnit {
    ReconciliationUnit::new(documents, BTreeSet::new())
}

/// Server probe with canned answers
#[cfg(test)]
#[derive(Debug, Default)]
pub struct StaticProbe {
    healthy: bool,
    version: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

#[cfg(test)]
impl StaticProbe {
    pub fn healthy(version: &str) -> Self {
        Self {
            healthy: true,
            version: Some(version.to_string()),
            ..Self::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().expect("probe lock").clone()
    }

    async fn record(&self, url: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().expect("probe lock") = Some(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ServerProbe for StaticProbe {
    async fn health(&self, base_url: &str) -> Result<bool, ProbeError> {
        self.record(base_url).await;
        Ok(self.healthy)
    }

    async fn version(&self, base_url: &str) -> Result<String, ProbeError> {
        self.record(base_url).await;
        self.version.clone().ok_or(ProbeError::Status(404))
    }
}

/// Reconciler wired to the mock cluster and the shipped templates
#[cfg(test)]
pub fn test_reconciler(mock: &MockClusterClient, probe: Arc<StaticProbe>) -> Reconciler {
    let cluster = Arc::new(mock.clone());
    Reconciler::new(
        cluster.clone(),
        cluster.clone(),
        Arc::new(test_templates()),
        probe,
        Arc::new(ReferenceIndex::for_cluster(cluster, None)),
        Arc::new(Metrics::new().expect("metrics registry")),
        test_config(),
    )
}
