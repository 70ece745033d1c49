//! `ClusterClient` backed by `kube::Api<DynamicObject>`

use crate::cluster_trait::{ClusterClient, ScopeResolver};
use crate::error::ClusterError;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::Client;
use manifest_engine::{GroupVersionKind, ObjectIdentity, ResourceDocument};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Resolves kinds through API discovery and caches the result per GVK
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    resources: Arc<RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        if let Some(found) = self.resources.read().await.get(gvk) {
            return Ok(found.clone());
        }

        let kube_gvk = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let resolved = discovery::pinned_kind(&self.client, &kube_gvk)
            .await
            .map_err(|e| match ClusterError::from(e) {
                ClusterError::NotFound(_) => ClusterError::UnknownKind(gvk.to_string()),
                other => other,
            })?;
        debug!("Discovered {} as {}", gvk, resolved.0.plural);

        self.resources
            .write()
            .await
            .insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, caps) = self.resolve(gvk).await?;
        let api = match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }

    async fn api_for(&self, document: &ResourceDocument) -> Result<Api<DynamicObject>, ClusterError> {
        self.api(&document.gvk(), document.namespace()).await
    }
}

fn to_document(object: &DynamicObject) -> Result<ResourceDocument, ClusterError> {
    let value = serde_json::to_value(object)?;
    ResourceDocument::from_value(value).map_err(ClusterError::InvalidObject)
}

fn to_dynamic(document: &ResourceDocument) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(document.as_value().clone())?)
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<ResourceDocument>, ClusterError> {
        let api = self.api(&id.gvk, id.namespace.as_deref()).await?;
        match api.get_opt(&id.name).await? {
            Some(object) => Ok(Some(to_document(&object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, document: &ResourceDocument) -> Result<ResourceDocument, ClusterError> {
        let api = self.api_for(document).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(document)?)
            .await?;
        to_document(&created)
    }

    async fn apply(
        &self,
        document: &ResourceDocument,
        field_manager: &str,
    ) -> Result<ResourceDocument, ClusterError> {
        let api = self.api_for(document).await?;
        let params = PatchParams::apply(field_manager).force();
        let patched = api
            .patch(document.name(), &params, &Patch::Apply(document.as_value()))
            .await?;
        to_document(&patched)
    }

    async fn delete(&self, id: &ObjectIdentity) -> Result<(), ClusterError> {
        let api = self.api(&id.gvk, id.namespace.as_deref()).await?;
        match api.delete(&id.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match ClusterError::from(e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<ResourceDocument>, ClusterError> {
        let api = self.api(gvk, namespace).await?;
        let mut params = ListParams::default();
        if let Some(selector) = field_selector {
            params = params.fields(selector);
        }
        let list = api.list(&params).await?;
        list.items.iter().map(to_document).collect()
    }

    async fn patch_status(&self, id: &ObjectIdentity, status: &Value) -> Result<(), ClusterError> {
        let api = self.api(&id.gvk, id.namespace.as_deref()).await?;
        api.patch_status(
            &id.name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScopeResolver for KubeClusterClient {
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError> {
        let (_, caps) = self.resolve(gvk).await?;
        Ok(caps.scope == Scope::Namespaced)
    }
}
