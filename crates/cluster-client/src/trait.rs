//! Cluster access traits
//!
//! The reconciler only talks to the cluster through these traits so the
//! apply algorithm can run against `MockClusterClient` in unit tests.

use crate::error::ClusterError;
use manifest_engine::{GroupVersionKind, ObjectIdentity, ResourceDocument};
use serde_json::Value;

/// Generic object CRUD over any served kind
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches the live object, `None` when it does not exist
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<ResourceDocument>, ClusterError>;

    /// Creates the object exactly as given
    async fn create(&self, document: &ResourceDocument) -> Result<ResourceDocument, ClusterError>;

    /// Server-side apply with forced field ownership for `field_manager`
    async fn apply(
        &self,
        document: &ResourceDocument,
        field_manager: &str,
    ) -> Result<ResourceDocument, ClusterError>;

    /// Deletes the object with background propagation. A missing object is
    /// not an error.
    async fn delete(&self, id: &ObjectIdentity) -> Result<(), ClusterError>;

    /// Lists objects of a kind, optionally restricted to one namespace and
    /// filtered with a server-side field selector
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<ResourceDocument>, ClusterError>;

    /// Merge-patches the status subresource
    async fn patch_status(&self, id: &ObjectIdentity, status: &Value) -> Result<(), ClusterError>;
}

/// Answers whether a kind is namespace-scoped
#[async_trait::async_trait]
pub trait ScopeResolver: Send + Sync {
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError>;
}
