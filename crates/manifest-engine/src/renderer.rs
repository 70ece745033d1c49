//! Render pipeline: composition, then the instance plugins in fixed order
//! (name prefix, namespace, field mutation), then kind exclusion.

use crate::error::RenderError;
use crate::filesystem::FileSystem;
use crate::kustomize::Kustomizer;
use crate::mutator::{FieldMapping, FieldMutator};
use crate::transform::{NamePrefixTransformer, NamespaceTransformer, Transformer};
use crate::unit::ReconciliationUnit;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Per-instance inputs to a render
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    /// Prefix for every document name; usually the instance name
    pub name_prefix: Option<String>,
    /// Kinds never renamed (the instance's own kind)
    pub prefix_exclude_kinds: Vec<String>,
    pub namespace: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub mappings: Vec<FieldMapping>,
    pub excluded_kinds: BTreeSet<String>,
}

impl RenderRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn prefix_exclude_kind(mut self, kind: impl Into<String>) -> Self {
        self.prefix_exclude_kinds.push(kind.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn mapping(mut self, mapping: FieldMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn exclude_kind(mut self, kind: impl Into<String>) -> Self {
        self.excluded_kinds.insert(kind.into());
        self
    }
}

/// Renders the template tree at `root` for one instance.
///
/// Any failure aborts the whole render; no partial unit is returned.
pub fn render(
    fs: &dyn FileSystem,
    root: &Path,
    request: &RenderRequest,
) -> Result<ReconciliationUnit, RenderError> {
    // Constructed first so an invalid namespace fails before any file is read
    let namespace = request
        .namespace
        .as_deref()
        .map(NamespaceTransformer::new)
        .transpose()?;

    let mut documents = Kustomizer::new()
        .with_variables(request.variables.clone())
        .run(fs, root)?;

    if let Some(prefix) = &request.name_prefix {
        NamePrefixTransformer::new(prefix.as_str())
            .exclude_kinds(request.prefix_exclude_kinds.iter().cloned())
            .transform(&mut documents)?;
    }
    if let Some(namespace) = &namespace {
        namespace.transform(&mut documents)?;
    }
    FieldMutator::new(request.mappings.clone()).apply(&mut documents)?;

    let unit = ReconciliationUnit::new(documents, request.excluded_kinds.clone());
    debug!(
        "Rendered {} documents from {} (excluded kinds: {:?})",
        unit.len(),
        root.display(),
        unit.excluded_kinds()
    );
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::filesystem::MemoryFs;
    use serde_json::Value;

    fn templates() -> MemoryFs {
        MemoryFs::new()
            .with_file(
                "manifests/kustomization.yaml",
                "resources:\n  - pvc.yaml\n  - service.yaml\n  - binding.yaml\n",
            )
            .with_file(
                "manifests/pvc.yaml",
                "apiVersion: v1\nkind: PersistentVolumeClaim\nmetadata:\n  name: storage\nspec:\n  accessModes: [ReadWriteOnce]\n",
            )
            .with_file(
                "manifests/service.yaml",
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: service\nspec:\n  selector:\n    app: $(INSTANCE)\n",
            )
            .with_file(
                "manifests/binding.yaml",
                "apiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRoleBinding\nmetadata:\n  name: binding\nroleRef:\n  apiGroup: rbac.authorization.k8s.io\n  kind: ClusterRole\n  name: distribution-role\n",
            )
    }

    fn request() -> RenderRequest {
        RenderRequest::new()
            .name_prefix("demo")
            .namespace("team-a")
            .variable("INSTANCE", "demo")
            .mapping(
                FieldMapping::new("PersistentVolumeClaim", "/spec/resources/requests/storage")
                    .unwrap()
                    .default_value("10Gi")
                    .create_if_not_exists(true),
            )
            .mapping(
                FieldMapping::new("ClusterRoleBinding", "/subjects/0/namespace")
                    .unwrap()
                    .source("team-a")
                    .create_if_not_exists(true),
            )
    }

    #[test]
    fn test_default_storage_size_is_rendered() {
        let unit = render(&templates(), Path::new("manifests"), &request()).unwrap();
        let pvc = unit.find_kind("PersistentVolumeClaim").unwrap();
        assert_eq!(pvc.name(), "demo-storage");
        assert_eq!(pvc.namespace(), Some("team-a"));
        assert_eq!(
            pvc.as_value().pointer("/spec/resources/requests/storage"),
            Some(&Value::from("10Gi"))
        );
    }

    #[test]
    fn test_cluster_scoped_binding_has_no_namespace() {
        let unit = render(&templates(), Path::new("manifests"), &request()).unwrap();
        let binding = unit.find_kind("ClusterRoleBinding").unwrap();
        assert_eq!(binding.name(), "demo-binding");
        assert_eq!(binding.namespace(), None);
        assert_eq!(
            binding.as_value().pointer("/subjects/0/namespace"),
            Some(&Value::from("team-a"))
        );
    }

    #[test]
    fn test_excluded_kind_is_filtered() {
        let unit = render(
            &templates(),
            Path::new("manifests"),
            &request().exclude_kind("PersistentVolumeClaim"),
        )
        .unwrap();
        assert_eq!(unit.len(), 2);
        assert!(unit.find_kind("PersistentVolumeClaim").is_none());
    }

    #[test]
    fn test_invalid_namespace_fails_before_rendering() {
        let err = render(&MemoryFs::new(), Path::new("manifests"), &request().namespace("Bad_NS"))
            .unwrap_err();
        assert!(matches!(err, RenderError::Transform(TransformError::InvalidName { .. })));
    }

    #[test]
    fn test_render_twice_is_identical() {
        let fs = templates();
        let first = render(&fs, Path::new("manifests"), &request()).unwrap();
        let second = render(&fs, Path::new("manifests"), &request()).unwrap();
        assert_eq!(first, second);
    }
}
