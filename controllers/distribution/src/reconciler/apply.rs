//! Applies a rendered unit against live cluster state.
//!
//! Each document is created, patched or skipped. Objects owned by anyone
//! other than the applying instance are never written, whatever the desired
//! state says.

use cluster_client::{ClusterClient, ClusterError, ScopeResolver};
use manifest_engine::{
    FieldPath, GroupVersionKind, ObjectIdentity, OwnerLink, PathSegment, ReconciliationUnit,
    ResourceDocument,
};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// API group of the RBAC referents checked before applying a binding
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const RBAC_VERSION: &str = "v1";

/// The instance on whose behalf a unit is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl InstanceIdentity {
    pub fn owner_link(&self) -> OwnerLink {
        OwnerLink {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
        }
    }

    /// Server-side apply field manager; one per instance
    pub fn field_manager(&self) -> &str {
        &self.name
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(&self.api_version, &self.kind)
    }

    pub fn object_identity(&self) -> ObjectIdentity {
        ObjectIdentity {
            gvk: self.gvk(),
            namespace: Some(self.namespace.clone()),
            name: self.name.clone(),
        }
    }

    /// Whether `doc` is this instance's own object. Version is ignored; a
    /// document without a namespace is taken to live in the instance's.
    pub fn is_self(&self, doc: &ResourceDocument) -> bool {
        let gvk = self.gvk();
        doc.kind() == gvk.kind
            && doc.gvk().group == gvk.group
            && doc.name() == self.name
            && doc.namespace().unwrap_or(self.namespace.as_str()) == self.namespace
    }

    /// Whether `live` carries an owner reference to this instance and no
    /// controller reference to anyone else
    pub fn owns(&self, live: &ResourceDocument) -> bool {
        if live.controller_owner().is_some_and(|o| o.uid != self.uid) {
            return false;
        }
        live.owner_links().iter().any(|o| o.uid == self.uid)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Why a document was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The document is the instance itself
    SelfReference,
    /// The referenced role does not exist yet
    DanglingReference { referent: String },
    /// The live object is controlled by another instance or by nobody
    NotOwned { owner: Option<String> },
    /// Kind is never patched after creation
    Immutable,
    /// Live object already matches
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Patched,
    /// Owned object of an excluded kind was removed
    Deleted,
    Skipped(SkipReason),
}

/// Per-document outcomes of one apply
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<(ObjectIdentity, Outcome)>,
}

impl ApplyReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Created))
    }

    pub fn patched(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Patched))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Deleted))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn outcome(&self, kind: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id.gvk.kind == kind)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Failures that abort the unit
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The cluster cannot classify the kind
    #[error("cannot resolve scope of {kind}: {source}")]
    Scope {
        kind: String,
        #[source]
        source: ClusterError,
    },

    /// Network or API server failure; retried with backoff
    #[error("{object}: {source}")]
    Transient {
        object: String,
        #[source]
        source: ClusterError,
    },

    /// Optimistic concurrency conflict; the pass is re-run
    #[error("conflict on {object}: {source}")]
    Conflict {
        object: String,
        #[source]
        source: ClusterError,
    },

    /// The API server rejected the document itself
    #[error("{object} rejected: {reason}")]
    InvalidDocument { object: String, reason: String },
}

impl ApplyError {
    fn classify(id: &ObjectIdentity, error: ClusterError) -> Self {
        let object = id.to_string();
        match error {
            ClusterError::Conflict(_) => ApplyError::Conflict { object, source: error },
            ClusterError::UnknownKind(_) => ApplyError::Scope {
                kind: id.gvk.to_string(),
                source: error,
            },
            ClusterError::Api { code: 400 | 422, message } => {
                ApplyError::InvalidDocument { object, reason: message }
            }
            ClusterError::InvalidObject(reason) => ApplyError::InvalidDocument { object, reason },
            ClusterError::Serialization(e) => ApplyError::InvalidDocument {
                object,
                reason: e.to_string(),
            },
            other => ApplyError::Transient { object, source: other },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Conflict { .. })
    }
}

/// Creates, patches or skips each document of a unit for one instance
pub struct ResourceApplier<'a> {
    client: &'a dyn ClusterClient,
    scope: &'a dyn ScopeResolver,
    instance: &'a InstanceIdentity,
}

impl<'a> ResourceApplier<'a> {
    pub fn new(
        client: &'a dyn ClusterClient,
        scope: &'a dyn ScopeResolver,
        instance: &'a InstanceIdentity,
    ) -> Self {
        Self { client, scope, instance }
    }

    /// Applies every document, then removes owned leftovers of excluded
    /// kinds. The first error aborts the rest.
    pub async fn apply(&self, unit: &ReconciliationUnit) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();
        for doc in unit.documents() {
            let outcome = self.apply_document(doc).await?;
            self.log_outcome(doc, &outcome);
            report.outcomes.push((doc.identity(), outcome));
        }
        for doc in unit.excluded_documents() {
            if let Some(outcome) = self.prune_document(doc).await? {
                self.log_outcome(doc, &outcome);
                report.outcomes.push((doc.identity(), outcome));
            }
        }
        Ok(report)
    }

    fn log_outcome(&self, doc: &ResourceDocument, outcome: &Outcome) {
        match outcome {
            Outcome::Created => info!("Created {} for {}", doc.identity(), self.instance),
            Outcome::Patched => info!("Patched {} for {}", doc.identity(), self.instance),
            Outcome::Deleted => info!("Deleted {} for {}: kind excluded", doc.identity(), self.instance),
            Outcome::Skipped(SkipReason::NotOwned { owner }) => warn!(
                "Skipping {} for {}: controlled by {}",
                doc.identity(),
                self.instance,
                owner.as_deref().unwrap_or("nobody")
            ),
            Outcome::Skipped(reason) => {
                debug!("Skipping {} for {}: {:?}", doc.identity(), self.instance, reason);
            }
        }
    }

    /// Deletes the live counterpart of an excluded document when this
    /// instance owns it. Claims are kept so their data survives.
    async fn prune_document(&self, doc: &ResourceDocument) -> Result<Option<Outcome>, ApplyError> {
        if self.instance.is_self(doc) || doc.resource_kind().policy().immutable_after_create {
            return Ok(None);
        }
        let id = doc.identity();
        let live = self
            .client
            .get(&id)
            .await
            .map_err(|e| ApplyError::classify(&id, e))?;
        let Some(live) = live else {
            return Ok(None);
        };
        if !self.instance.owns(&live) {
            debug!("Leaving {} in place for {}: not owned", id, self.instance);
            return Ok(None);
        }
        self.client
            .delete(&id)
            .await
            .map_err(|e| ApplyError::classify(&id, e))?;
        Ok(Some(Outcome::Deleted))
    }

    async fn apply_document(&self, doc: &ResourceDocument) -> Result<Outcome, ApplyError> {
        if self.instance.is_self(doc) {
            return Ok(Outcome::Skipped(SkipReason::SelfReference));
        }

        let policy = doc.resource_kind().policy();
        // Known cluster-scoped kinds are looked up and written without a namespace
        let mut doc = doc.clone();
        if policy.cluster_scoped {
            doc.clear_namespace();
        }
        let doc = &doc;

        if policy.binding_referent.is_some()
            && let Some(referent) = self.missing_referent(doc).await?
        {
            return Ok(Outcome::Skipped(SkipReason::DanglingReference { referent }));
        }

        let id = doc.identity();
        let live = self
            .client
            .get(&id)
            .await
            .map_err(|e| ApplyError::classify(&id, e))?;

        let Some(live) = live else {
            return self.create(doc).await;
        };

        if !self.instance.owns(&live) {
            return Ok(Outcome::Skipped(SkipReason::NotOwned {
                owner: describe_owner(&live),
            }));
        }
        if policy.immutable_after_create {
            return Ok(Outcome::Skipped(SkipReason::Immutable));
        }

        let mut desired = doc.clone();
        desired.set_owner_link(&self.instance.owner_link());
        if policy.preserve_selector {
            preserve_selector(&mut desired, &live)?;
        }
        if is_subset(desired.as_value(), live.as_value()) {
            return Ok(Outcome::Skipped(SkipReason::Unchanged));
        }

        self.client
            .apply(&desired, self.instance.field_manager())
            .await
            .map_err(|e| ApplyError::classify(&id, e))?;
        Ok(Outcome::Patched)
    }

    async fn create(&self, doc: &ResourceDocument) -> Result<Outcome, ApplyError> {
        let id = doc.identity();
        let namespaced = self
            .scope
            .is_namespaced(&id.gvk)
            .await
            .map_err(|source| ApplyError::Scope {
                kind: id.gvk.to_string(),
                source,
            })?;

        let mut desired = doc.clone();
        if namespaced {
            if desired.namespace().is_none() {
                desired.set_namespace(self.instance.namespace.as_str());
            }
            desired.set_owner_link(&self.instance.owner_link());
        } else {
            desired.clear_namespace();
        }

        self.client
            .create(&desired)
            .await
            .map_err(|e| ApplyError::classify(&id, e))?;
        Ok(Outcome::Created)
    }

    /// Name of the referenced role when it does not exist
    async fn missing_referent(&self, doc: &ResourceDocument) -> Result<Option<String>, ApplyError> {
        let role_ref = doc.as_value().get("roleRef");
        let Some(name) = role_ref.and_then(|r| r.get("name")).and_then(Value::as_str) else {
            return Ok(None);
        };
        let default_kind = doc
            .resource_kind()
            .policy()
            .binding_referent
            .map(|r| r.kind())
            .unwrap_or_default();
        let kind = role_ref
            .and_then(|r| r.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or(default_kind);

        let referent = ObjectIdentity {
            gvk: GroupVersionKind::new(RBAC_GROUP, RBAC_VERSION, kind),
            namespace: if kind == "Role" { doc.namespace().map(str::to_string) } else { None },
            name: name.to_string(),
        };
        let found = self
            .client
            .get(&referent)
            .await
            .map_err(|e| ApplyError::classify(&referent, e))?;
        Ok(found.is_none().then(|| referent.to_string()))
    }
}

/// Controlling owner of a live object, else its first owner
fn describe_owner(live: &ResourceDocument) -> Option<String> {
    live.controller_owner()
        .or_else(|| live.owner_links().into_iter().next())
        .map(|o| format!("{} {}", o.kind, o.name))
}

/// Copies the live `spec.selector` over the desired one. The selector is
/// immutable, so a document that cannot take it is rejected.
fn preserve_selector(desired: &mut ResourceDocument, live: &ResourceDocument) -> Result<(), ApplyError> {
    let path = FieldPath::from_segments(vec![
        PathSegment::Key("spec".to_string()),
        PathSegment::Key("selector".to_string()),
    ]);
    let Some(selector) = live.get(&path).cloned() else {
        return Ok(());
    };
    desired
        .set_or_create(&path, selector)
        .map_err(|e| ApplyError::InvalidDocument {
            object: desired.identity().to_string(),
            reason: format!("cannot keep live selector: {e}"),
        })
}

/// Whether every field in `desired` is present with the same value in `live`.
///
/// Arrays must have equal length and match element by element.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|v| is_subset(value, v))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        (want, have) => want == have,
    }
}
