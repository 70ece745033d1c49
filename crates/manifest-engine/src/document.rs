//! Rendered resource documents.
//!
//! A `ResourceDocument` is a schema-less JSON tree describing one target
//! object. Documents are rebuilt on every reconciliation pass.

use crate::kind::ResourceKind;
use crate::path::{FieldPath, PathError};
use serde_json::{Map, Value, json};
use std::fmt;

/// (group, version, kind) of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Splits `apps/v1` or `v1` into group and version
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Stable identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvk.kind, self.name),
        }
    }
}

/// Controller back-reference stored in `metadata.ownerReferences`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLink {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerLink {
    pub fn to_value(&self) -> Value {
        json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "name": self.name,
            "uid": self.uid,
            "controller": true,
            "blockOwnerDeletion": true,
        })
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            api_version: value.get("apiVersion")?.as_str()?.to_string(),
            kind: value.get("kind")?.as_str()?.to_string(),
            name: value.get("name")?.as_str()?.to_string(),
            uid: value.get("uid")?.as_str()?.to_string(),
        })
    }
}

/// One rendered object. The wrapped value is always a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    value: Value,
}

impl ResourceDocument {
    /// Wraps a JSON value that carries apiVersion, kind and metadata.name
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("document is not a mapping".to_string());
        }
        let doc = Self { value };
        if doc.api_version().is_empty() {
            return Err("missing apiVersion".to_string());
        }
        if doc.kind().is_empty() {
            return Err("missing kind".to_string());
        }
        if doc.name().is_empty() {
            return Err("missing metadata.name".to_string());
        }
        Ok(doc)
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.value.pointer(pointer).and_then(Value::as_str)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        object_entry(&mut self.value, "metadata")
    }

    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion").unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.str_at("/kind").unwrap_or_default()
    }

    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::from_kind(self.kind())
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.str_at("/metadata/name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_at("/metadata/namespace").filter(|ns| !ns.is_empty())
    }

    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity {
            gvk: self.gvk(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.metadata_mut()
            .insert("name".to_string(), Value::String(name.into()));
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.into()));
    }

    pub fn clear_namespace(&mut self) {
        self.metadata_mut().remove("namespace");
    }

    /// Adds labels without overriding ones the document already sets
    pub fn add_labels<'a>(&mut self, labels: impl IntoIterator<Item = (&'a String, &'a String)>) {
        let existing = ensure_object(
            self.metadata_mut()
                .entry("labels")
                .or_insert_with(|| Value::Object(Map::new())),
        );
        for (key, value) in labels {
            existing
                .entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }

    fn owner_references(&self) -> impl Iterator<Item = &Value> {
        self.value
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    pub fn owner_links(&self) -> Vec<OwnerLink> {
        self.owner_references()
            .filter_map(OwnerLink::from_value)
            .collect()
    }

    /// The owner reference flagged `controller: true`, if any
    pub fn controller_owner(&self) -> Option<OwnerLink> {
        self.owner_references()
            .find(|r| r.get("controller").and_then(Value::as_bool) == Some(true))
            .and_then(OwnerLink::from_value)
    }

    /// Records `owner` as the controlling owner.
    ///
    /// A controller reference to a different UID is never replaced; in that
    /// case nothing changes and `false` is returned.
    pub fn set_owner_link(&mut self, owner: &OwnerLink) -> bool {
        if let Some(existing) = self.controller_owner() {
            return existing.uid == owner.uid;
        }
        let refs = self
            .metadata_mut()
            .entry("ownerReferences")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !refs.is_array() {
            *refs = Value::Array(Vec::new());
        }
        if let Value::Array(items) = refs {
            items.retain(|r| r.get("uid").and_then(Value::as_str) != Some(owner.uid.as_str()));
            items.push(owner.to_value());
        }
        true
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.get(&self.value)
    }

    pub fn set_existing(&mut self, path: &FieldPath, value: Value) -> Result<(), PathError> {
        path.set_existing(&mut self.value, value)
    }

    pub fn set_or_create(&mut self, path: &FieldPath, value: Value) -> Result<(), PathError> {
        path.set_or_create(&mut self.value, value)
    }

    /// Applies an RFC 7386 merge patch to the document body
    pub fn merge(&mut self, patch: &Value) {
        json_patch::merge(&mut self.value, patch);
    }
}

/// Coerces `value` into a mapping and borrows it
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with a mapping"),
    }
}

/// Mapping stored under `key`, created when missing
fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    ensure_object(
        ensure_object(value)
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new())),
    )
}
