//! Maps a shared configuration ConfigMap back to the Distributions that
//! mount it.
//!
//! Two lookups are composed by [`ReferenceIndex`]: a server-side field
//! selector on the CRD's selectable field, and a full scan of all instances.
//! When both fail the index errs toward over-matching, since a spurious
//! reconcile is cheap and a missed one leaves stale configuration running.

use async_trait::async_trait;
use cluster_client::{ClusterClient, ClusterError};
use crds::{API_GROUP, API_VERSION, Distribution, KIND, USER_CONFIG_NAME_FIELD};
use manifest_engine::{GroupVersionKind, ResourceDocument};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// `namespace/name` of either side of a reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of a reference lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLookup {
    /// Instances to reconcile; `over_matched` marks a best-effort answer
    Matched {
        instances: BTreeSet<ObjectKey>,
        over_matched: bool,
    },
    /// No answer at all; the caller should reconcile everything it watches
    Unsupported,
}

/// One strategy for finding the instances that reference a ConfigMap
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(&self, referenced: &ObjectKey) -> Result<BTreeSet<ObjectKey>, ClusterError>;
}

fn distribution_gvk() -> GroupVersionKind {
    GroupVersionKind::new(API_GROUP, API_VERSION, KIND)
}

/// Whether `doc` resolves its user configuration to `referenced`.
///
/// Instances that cannot be decoded count as referencing.
fn references(doc: ResourceDocument, referenced: &ObjectKey) -> Option<ObjectKey> {
    let key = ObjectKey::new(doc.namespace().unwrap_or("default"), doc.name());
    match serde_json::from_value::<Distribution>(doc.into_value()) {
        Ok(distribution) => distribution
            .user_config_ref()
            .filter(|(ns, name)| *ns == referenced.namespace && *name == referenced.name)
            .map(|_| key),
        Err(e) => {
            warn!("Could not decode Distribution {}, assuming it references {}: {}", key, referenced, e);
            Some(key)
        }
    }
}

/// Server-side lookup through the `spec.server.userConfig.configMapName`
/// selectable field. Unsupported API servers reject the selector.
pub struct FieldIndexLookup {
    client: Arc<dyn ClusterClient>,
    watch_namespace: Option<String>,
}

impl FieldIndexLookup {
    pub fn new(client: Arc<dyn ClusterClient>, watch_namespace: Option<String>) -> Self {
        Self { client, watch_namespace }
    }
}

#[async_trait]
impl ReferenceLookup for FieldIndexLookup {
    fn name(&self) -> &'static str {
        "field-index"
    }

    async fn find(&self, referenced: &ObjectKey) -> Result<BTreeSet<ObjectKey>, ClusterError> {
        let selector = format!(
            "{}={}",
            USER_CONFIG_NAME_FIELD.trim_start_matches('.'),
            referenced.name
        );
        let docs = self
            .client
            .list(&distribution_gvk(), self.watch_namespace.as_deref(), Some(&selector))
            .await?;
        // the selector only sees the name; the namespace override is checked here
        Ok(docs
            .into_iter()
            .filter_map(|doc| references(doc, referenced))
            .collect())
    }
}

/// Lists every instance and resolves each reference locally
pub struct ScanLookup {
    client: Arc<dyn ClusterClient>,
    watch_namespace: Option<String>,
}

impl ScanLookup {
    pub fn new(client: Arc<dyn ClusterClient>, watch_namespace: Option<String>) -> Self {
        Self { client, watch_namespace }
    }
}

#[async_trait]
impl ReferenceLookup for ScanLookup {
    fn name(&self) -> &'static str {
        "scan"
    }

    async fn find(&self, referenced: &ObjectKey) -> Result<BTreeSet<ObjectKey>, ClusterError> {
        let docs = self
            .client
            .list(&distribution_gvk(), self.watch_namespace.as_deref(), None)
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| references(doc, referenced))
            .collect())
    }
}

/// Primary lookup, then fallback, then every instance seen so far
pub struct ReferenceIndex {
    primary: Box<dyn ReferenceLookup>,
    fallback: Box<dyn ReferenceLookup>,
    known: Mutex<BTreeSet<ObjectKey>>,
}

impl ReferenceIndex {
    pub fn new(primary: Box<dyn ReferenceLookup>, fallback: Box<dyn ReferenceLookup>) -> Self {
        Self {
            primary,
            fallback,
            known: Mutex::new(BTreeSet::new()),
        }
    }

    /// Field-selector lookup backed by a full scan
    pub fn for_cluster(client: Arc<dyn ClusterClient>, watch_namespace: Option<String>) -> Self {
        Self::new(
            Box::new(FieldIndexLookup::new(Arc::clone(&client), watch_namespace.clone())),
            Box::new(ScanLookup::new(client, watch_namespace)),
        )
    }

    /// Records an instance for the over-matching answer
    pub fn observe(&self, instance: ObjectKey) {
        self.lock_known().insert(instance);
    }

    pub fn forget(&self, instance: &ObjectKey) {
        self.lock_known().remove(instance);
    }

    fn lock_known(&self) -> std::sync::MutexGuard<'_, BTreeSet<ObjectKey>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn find_referencing_instances(&self, referenced: &ObjectKey) -> IndexLookup {
        let primary_error = match self.primary.find(referenced).await {
            Ok(instances) => return self.matched(instances),
            Err(e) => e,
        };
        debug!(
            "{} lookup for {} failed, falling back to {}: {}",
            self.primary.name(),
            referenced,
            self.fallback.name(),
            primary_error
        );

        match self.fallback.find(referenced).await {
            Ok(instances) => self.matched(instances),
            Err(e) => {
                let known = self.lock_known().clone();
                warn!(
                    "{} lookup for {} failed, assuming all {} known instances reference it: {}",
                    self.fallback.name(),
                    referenced,
                    known.len(),
                    e
                );
                if known.is_empty() {
                    IndexLookup::Unsupported
                } else {
                    IndexLookup::Matched {
                        instances: known,
                        over_matched: true,
                    }
                }
            }
        }
    }

    fn matched(&self, instances: BTreeSet<ObjectKey>) -> IndexLookup {
        self.lock_known().extend(instances.iter().cloned());
        IndexLookup::Matched {
            instances,
            over_matched: false,
        }
    }
}
