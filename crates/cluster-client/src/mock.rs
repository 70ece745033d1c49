//! Mock ClusterClient for unit testing
//!
//! Objects live in memory keyed by identity. Every call is recorded so tests
//! can assert on exactly which mutations a reconciliation pass issued.

use crate::cluster_trait::{ClusterClient, ScopeResolver};
use crate::error::ClusterError;
use manifest_engine::{GroupVersionKind, ObjectIdentity, ResourceDocument};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Operations that can be recorded or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Apply,
    Delete,
    List,
    PatchStatus,
    Scope,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Field manager for apply, field selector for list
    pub detail: Option<String>,
}

/// Kinds the mock reports as cluster-scoped unless overridden
const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "CustomResourceDefinition",
];

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    objects: Arc<Mutex<BTreeMap<ObjectIdentity, Value>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failures: Arc<Mutex<HashMap<(Operation, String), (u16, String)>>>,
    unknown_kinds: Arc<Mutex<HashSet<String>>>,
    field_selectors_unsupported: Arc<AtomicBool>,
    next_version: Arc<AtomicU64>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("objects", &self.lock_objects().len())
            .field("calls", &self.lock_calls().len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockClusterClient {
    /// Create a new, empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectIdentity, Value>> {
        lock(&self.objects)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        lock(&self.calls)
    }

    /// Seeds an object without recording a call. Missing `uid` and
    /// `resourceVersion` are filled in.
    pub fn insert(&self, value: Value) -> ResourceDocument {
        let mut doc = match ResourceDocument::from_value(value) {
            Ok(doc) => doc,
            Err(reason) => panic!("seeded object is invalid: {reason}"),
        };
        self.stamp(&mut doc, true);
        self.lock_objects().insert(doc.identity(), doc.as_value().clone());
        doc
    }

    /// Removes an object without recording a call
    pub fn remove(&self, id: &ObjectIdentity) -> Option<Value> {
        self.lock_objects().remove(id)
    }

    /// Current stored object
    pub fn object(&self, id: &ObjectIdentity) -> Option<Value> {
        self.lock_objects().get(id).cloned()
    }

    pub fn objects(&self) -> Vec<Value> {
        self.lock_objects().values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock_calls().clone()
    }

    pub fn calls_for(&self, operation: Operation) -> Vec<RecordedCall> {
        self.lock_calls()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Create, apply, delete and status-patch calls
    pub fn mutation_calls(&self) -> Vec<RecordedCall> {
        self.lock_calls()
            .iter()
            .filter(|c| {
                matches!(
                    c.operation,
                    Operation::Create | Operation::Apply | Operation::Delete | Operation::PatchStatus
                )
            })
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock_calls().clear();
    }

    /// Makes every `operation` on `kind` fail with the given API status
    pub fn fail(&self, operation: Operation, kind: &str, code: u16, message: &str) {
        lock(&self.failures).insert((operation, kind.to_string()), (code, message.to_string()));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Scope lookups for `kind` fail as if the kind were not served
    pub fn mark_unknown_kind(&self, kind: &str) {
        lock(&self.unknown_kinds).insert(kind.to_string());
    }

    /// Lists with a field selector fail with 400, like an API server that
    /// does not know the selectable field
    pub fn set_field_selectors_supported(&self, supported: bool) {
        self.field_selectors_unsupported
            .store(!supported, Ordering::SeqCst);
    }

    fn record(&self, operation: Operation, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, detail: Option<&str>) {
        self.lock_calls().push(RecordedCall {
            operation,
            kind: gvk.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            detail: detail.map(str::to_string),
        });
    }

    fn check_failure(&self, operation: Operation, kind: &str) -> Result<(), ClusterError> {
        match lock(&self.failures).get(&(operation, kind.to_string())) {
            Some((409, message)) => Err(ClusterError::Conflict(message.clone())),
            Some((404, message)) => Err(ClusterError::NotFound(message.clone())),
            Some((code, message)) => Err(ClusterError::Api {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn stamp(&self, doc: &mut ResourceDocument, create: bool) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut meta = json!({ "resourceVersion": version.to_string() });
        if create && doc.as_value().pointer("/metadata/uid").is_none() {
            meta["uid"] = Value::String(uuid::Uuid::new_v4().to_string());
        }
        doc.merge(&json!({ "metadata": meta }));
    }
}

/// Evaluates `a.b.c=value` terms joined by commas
fn matches_field_selector(object: &Value, selector: &str) -> bool {
    selector.split(',').filter(|t| !t.is_empty()).all(|term| {
        let (path, expected, negate) = match term.split_once("!=") {
            Some((p, v)) => (p, v, true),
            None => match term.split_once("==").or_else(|| term.split_once('=')) {
                Some((p, v)) => (p, v, false),
                None => return false,
            },
        };
        let pointer = format!("/{}", path.trim().trim_start_matches('.').replace('.', "/"));
        let actual = match object.pointer(&pointer) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        (actual == expected.trim()) != negate
    })
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get(&self, id: &ObjectIdentity) -> Result<Option<ResourceDocument>, ClusterError> {
        self.record(Operation::Get, &id.gvk, id.namespace.as_deref(), &id.name, None);
        self.check_failure(Operation::Get, &id.gvk.kind)?;
        self.lock_objects()
            .get(id)
            .cloned()
            .map(|v| ResourceDocument::from_value(v).map_err(ClusterError::InvalidObject))
            .transpose()
    }

    async fn create(&self, document: &ResourceDocument) -> Result<ResourceDocument, ClusterError> {
        let id = document.identity();
        self.record(Operation::Create, &id.gvk, id.namespace.as_deref(), &id.name, None);
        self.check_failure(Operation::Create, &id.gvk.kind)?;

        let mut objects = self.lock_objects();
        if objects.contains_key(&id) {
            return Err(ClusterError::Conflict(format!("{id} already exists")));
        }
        let mut created = document.clone();
        self.stamp(&mut created, true);
        objects.insert(id, created.as_value().clone());
        Ok(created)
    }

    async fn apply(
        &self,
        document: &ResourceDocument,
        field_manager: &str,
    ) -> Result<ResourceDocument, ClusterError> {
        let id = document.identity();
        self.record(Operation::Apply, &id.gvk, id.namespace.as_deref(), &id.name, Some(field_manager));
        self.check_failure(Operation::Apply, &id.gvk.kind)?;

        let mut objects = self.lock_objects();
        let mut applied = match objects.get(&id) {
            Some(live) => {
                let mut live = ResourceDocument::from_value(live.clone())
                    .map_err(ClusterError::InvalidObject)?;
                live.merge(document.as_value());
                self.stamp(&mut live, false);
                live
            }
            None => {
                let mut created = document.clone();
                self.stamp(&mut created, true);
                created
            }
        };
        if applied.as_value().pointer("/metadata/uid").is_none() {
            self.stamp(&mut applied, true);
        }
        objects.insert(id, applied.as_value().clone());
        Ok(applied)
    }

    async fn delete(&self, id: &ObjectIdentity) -> Result<(), ClusterError> {
        self.record(Operation::Delete, &id.gvk, id.namespace.as_deref(), &id.name, None);
        self.check_failure(Operation::Delete, &id.gvk.kind)?;
        self.lock_objects().remove(id);
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<ResourceDocument>, ClusterError> {
        self.record(Operation::List, gvk, namespace, "", field_selector);
        self.check_failure(Operation::List, &gvk.kind)?;
        if field_selector.is_some() && self.field_selectors_unsupported.load(Ordering::SeqCst) {
            return Err(ClusterError::Api {
                code: 400,
                message: format!("field label not supported: {}", field_selector.unwrap_or_default()),
            });
        }

        self.lock_objects()
            .iter()
            .filter(|(id, _)| id.gvk.group == gvk.group && id.gvk.kind == gvk.kind)
            .filter(|(id, _)| namespace.is_none() || id.namespace.as_deref() == namespace)
            .filter(|(_, v)| field_selector.is_none_or(|s| matches_field_selector(v, s)))
            .map(|(_, v)| ResourceDocument::from_value(v.clone()).map_err(ClusterError::InvalidObject))
            .collect()
    }

    async fn patch_status(&self, id: &ObjectIdentity, status: &Value) -> Result<(), ClusterError> {
        self.record(Operation::PatchStatus, &id.gvk, id.namespace.as_deref(), &id.name, None);
        self.check_failure(Operation::PatchStatus, &id.gvk.kind)?;

        let mut objects = self.lock_objects();
        let Some(object) = objects.get_mut(id) else {
            return Err(ClusterError::NotFound(id.to_string()));
        };
        json_patch::merge(object, &json!({ "status": status }));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScopeResolver for MockClusterClient {
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError> {
        self.record(Operation::Scope, gvk, None, "", None);
        self.check_failure(Operation::Scope, &gvk.kind)?;
        if lock(&self.unknown_kinds).contains(&gvk.kind) {
            return Err(ClusterError::UnknownKind(gvk.to_string()));
        }
        Ok(!CLUSTER_SCOPED.contains(&gvk.kind.as_str()))
    }
}
