//! Path-addressed field mutation.
//!
//! Mappings are applied in declaration order. Each mapping writes one value
//! (its source, else its default) into every document of the target kind.

use crate::document::ResourceDocument;
use crate::error::MutationError;
use crate::path::FieldPath;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub source_value: Value,
    pub default_value: Value,
    pub target_path: FieldPath,
    pub target_kind: String,
    pub create_if_not_exists: bool,
}

impl FieldMapping {
    /// Parses `target_field` as a path; source and default start empty
    pub fn new(target_kind: &str, target_field: &str) -> Result<Self, MutationError> {
        let target_path =
            FieldPath::parse(target_field).map_err(|reason| MutationError::InvalidPath {
                field: target_field.to_string(),
                reason,
            })?;
        Ok(Self {
            source_value: Value::Null,
            default_value: Value::Null,
            target_path,
            target_kind: target_kind.to_string(),
            create_if_not_exists: false,
        })
    }

    #[must_use]
    pub fn source(mut self, value: impl Into<Value>) -> Self {
        self.source_value = value.into();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    #[must_use]
    pub fn create_if_not_exists(mut self, create: bool) -> Self {
        self.create_if_not_exists = create;
        self
    }

    /// Source when non-empty, else default; `None` when both are empty
    pub fn effective_value(&self) -> Option<&Value> {
        [&self.source_value, &self.default_value]
            .into_iter()
            .find(|v| !is_empty(v))
    }
}

/// `null`, `""`, `{}` and `[]` count as unset
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldMutator {
    mappings: Vec<FieldMapping>,
}

impl FieldMutator {
    pub fn new(mappings: Vec<FieldMapping>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[FieldMapping] {
        &self.mappings
    }

    /// Applies every mapping to every document of its kind.
    ///
    /// The first failing document aborts the pass.
    pub fn apply(&self, documents: &mut [ResourceDocument]) -> Result<(), MutationError> {
        for mapping in &self.mappings {
            let Some(value) = mapping.effective_value() else {
                debug!(
                    "Skipping mapping for {} {}: no value",
                    mapping.target_kind, mapping.target_path
                );
                continue;
            };

            for doc in documents.iter_mut().filter(|d| d.kind() == mapping.target_kind) {
                let result = if mapping.create_if_not_exists {
                    doc.set_or_create(&mapping.target_path, value.clone())
                } else {
                    doc.set_existing(&mapping.target_path, value.clone())
                };
                result.map_err(|source| MutationError::Field {
                    kind: doc.kind().to_string(),
                    name: doc.name().to_string(),
                    path: mapping.target_path.to_string(),
                    source,
                })?;
                debug!(
                    "Set {} on {}/{}",
                    mapping.target_path,
                    doc.kind(),
                    doc.name()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathError;
    use serde_json::json;

    fn doc(value: Value) -> ResourceDocument {
        ResourceDocument::from_value(value).unwrap()
    }

    fn pvc() -> ResourceDocument {
        doc(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data"},
            "spec": {"accessModes": ["ReadWriteOnce"]}
        }))
    }

    fn service() -> ResourceDocument {
        doc(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "service"},
            "spec": {"selector": {"app": "server"}}
        }))
    }

    #[test]
    fn test_default_fallback() {
        let mapping = FieldMapping::new("PersistentVolumeClaim", "/spec/resources/requests/storage")
            .unwrap()
            .source("")
            .default_value("10Gi")
            .create_if_not_exists(true);
        let mut docs = vec![pvc()];
        FieldMutator::new(vec![mapping]).apply(&mut docs).unwrap();
        assert_eq!(docs[0].as_value()["spec"]["resources"]["requests"]["storage"], "10Gi");
    }

    #[test]
    fn test_source_wins_over_default() {
        let mapping = FieldMapping::new("PersistentVolumeClaim", "/spec/resources/requests/storage")
            .unwrap()
            .source("50Gi")
            .default_value("10Gi")
            .create_if_not_exists(true);
        let mut docs = vec![pvc()];
        FieldMutator::new(vec![mapping]).apply(&mut docs).unwrap();
        assert_eq!(docs[0].as_value()["spec"]["resources"]["requests"]["storage"], "50Gi");
    }

    #[test]
    fn test_both_empty_is_noop() {
        let mapping = FieldMapping::new("PersistentVolumeClaim", "/spec/resources/requests/storage")
            .unwrap()
            .source("")
            .default_value(json!({}));
        let mut docs = vec![pvc(), service()];
        let before = docs.clone();
        FieldMutator::new(vec![mapping]).apply(&mut docs).unwrap();
        assert_eq!(docs, before);
    }

    #[test]
    fn test_only_target_kind_is_mutated() {
        let mapping = FieldMapping::new("Service", "/spec/ports/0/port")
            .unwrap()
            .source(8321)
            .create_if_not_exists(true);
        let mut docs = vec![pvc(), service()];
        FieldMutator::new(vec![mapping]).apply(&mut docs).unwrap();
        assert_eq!(docs[0], pvc());
        assert_eq!(docs[1].as_value()["spec"]["ports"], json!([{"port": 8321}]));
    }

    #[test]
    fn test_missing_path_without_create_fails() {
        let mapping = FieldMapping::new("Service", "/spec/ports/0/port")
            .unwrap()
            .source(8321);
        let mut docs = vec![service()];
        let err = FieldMutator::new(vec![mapping]).apply(&mut docs).unwrap_err();
        match err {
            MutationError::Field { kind, name, source, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(name, "service");
                assert_eq!(source, PathError::MissingField("/spec/ports/0/port".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mappings_apply_in_order_and_are_idempotent() {
        let first = FieldMapping::new("Service", "/spec/ports/0/targetPort")
            .unwrap()
            .source(8321)
            .create_if_not_exists(true);
        let second = FieldMapping::new("Service", "/spec/ports/0/port")
            .unwrap()
            .source(8321)
            .create_if_not_exists(true);
        let mutator = FieldMutator::new(vec![first, second]);

        let mut docs = vec![service()];
        mutator.apply(&mut docs).unwrap();
        let once = docs.clone();
        mutator.apply(&mut docs).unwrap();

        assert_eq!(docs, once);
        assert_eq!(docs[0].as_value()["spec"]["ports"], json!([{"targetPort": 8321, "port": 8321}]));
    }

    #[test]
    fn test_invalid_target_field() {
        assert!(matches!(
            FieldMapping::new("Service", "/spec//port"),
            Err(MutationError::InvalidPath { .. })
        ));
    }
}
