//! Kubernetes resource watchers.
//!
//! Distributions are driven by `kube_runtime::Controller`, which also
//! requeues an instance when one of its owned objects changes. ConfigMap
//! changes are mapped back to instances through the reference index and fed
//! into the controller as extra triggers.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::reference_index::{IndexLookup, ObjectKey, ReferenceIndex};
use crds::Distribution;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, WatchStreamExt, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue delay after a write conflict
const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Requeue policy for failed passes: conflicts retry quickly, everything
/// else follows the per-instance Fibonacci backoff
pub fn error_policy(distribution: Arc<Distribution>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = ObjectKey::new(distribution.namespace_or_default(), distribution.name_any());
    if error.is_conflict() {
        debug!("Conflict reconciling Distribution {}, requeueing", key);
        return Action::requeue(CONFLICT_REQUEUE);
    }
    let delay = reconciler.backoff().record_failure(&key.to_string());
    warn!(
        "Reconciliation of Distribution {} failed ({} consecutive), retrying in {:?}: {}",
        key,
        reconciler.backoff().error_count(&key.to_string()),
        delay,
        error
    );
    Action::requeue(delay)
}

fn controller_stopped(e: impl std::fmt::Display) -> ControllerError {
    ControllerError::Watch(format!("Distribution controller stopped: {e}"))
}

/// Turns a ConfigMap change into reconcile triggers
pub async fn dispatch_config_map_change(
    index: &ReferenceIndex,
    config_map: &ObjectKey,
    instances: &UnboundedSender<ObjectRef<Distribution>>,
    everything: &UnboundedSender<()>,
) -> Result<(), ControllerError> {
    match index.find_referencing_instances(config_map).await {
        IndexLookup::Matched { instances: found, over_matched } => {
            if !found.is_empty() {
                info!(
                    "ConfigMap {} changed, requeueing {} Distributions{}",
                    config_map,
                    found.len(),
                    if over_matched { " (best effort)" } else { "" }
                );
            }
            for key in found {
                instances
                    .unbounded_send(ObjectRef::new(&key.name).within(&key.namespace))
                    .map_err(controller_stopped)?;
            }
        }
        IndexLookup::Unsupported => {
            warn!("Cannot resolve references to ConfigMap {}, requeueing all Distributions", config_map);
            everything.unbounded_send(()).map_err(controller_stopped)?;
        }
    }
    Ok(())
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: Option<String>) -> Self {
        Self {
            reconciler,
            client,
            namespace,
        }
    }

    /// Runs the Distribution controller until its streams end
    pub async fn watch_distributions(
        &self,
        instance_triggers: UnboundedReceiver<ObjectRef<Distribution>>,
        resync_triggers: UnboundedReceiver<()>,
    ) -> Result<(), ControllerError> {
        info!("Starting Distribution watcher");
        let ns = self.namespace.as_deref();
        let config = watcher::Config::default();

        let reconcile = |distribution: Arc<Distribution>, reconciler: Arc<Reconciler>| async move {
            reconciler.reconcile_distribution(&distribution).await
        };

        // Debounce batches bursts of owned-object events into one pass
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        Controller::new(scoped_api::<Distribution>(&self.client, ns), config.clone())
            .owns(scoped_api::<Deployment>(&self.client, ns), config.clone())
            .owns(scoped_api::<Service>(&self.client, ns), config.clone())
            .owns(scoped_api::<PersistentVolumeClaim>(&self.client, ns), config.clone())
            .owns(scoped_api::<NetworkPolicy>(&self.client, ns), config.clone())
            .owns(scoped_api::<ServiceAccount>(&self.client, ns), config)
            .reconcile_on(instance_triggers)
            .reconcile_all_on(resync_triggers)
            .with_config(controller_config)
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((object, _)) => debug!("Reconciled {}", object),
                    Err(e) => error!("Distribution controller error: {}", e),
                }
            })
            .await;

        Ok(())
    }

    /// Maps ConfigMap changes to the Distributions that mount them
    pub async fn watch_config_maps(
        &self,
        instance_triggers: UnboundedSender<ObjectRef<Distribution>>,
        resync_triggers: UnboundedSender<()>,
    ) -> Result<(), ControllerError> {
        info!("Starting ConfigMap watcher");
        let api = scoped_api::<ConfigMap>(&self.client, self.namespace.as_deref());
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());

        while let Some(event) = stream.next().await {
            let config_map = match event {
                Ok(watcher::Event::Apply(cm) | watcher::Event::Delete(cm)) => cm,
                Ok(watcher::Event::Init | watcher::Event::InitApply(_) | watcher::Event::InitDone) => continue,
                Err(e) => {
                    warn!("ConfigMap watch error: {}", e);
                    continue;
                }
            };
            let key = ObjectKey::new(
                config_map.namespace().unwrap_or_else(|| "default".to_string()),
                config_map.name_any(),
            );
            dispatch_config_map_change(&self.reconciler.index, &key, &instance_triggers, &resync_triggers).await?;
        }

        Ok(())
    }
}
