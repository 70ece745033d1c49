use super::{Transformer, validate_dns1123_label};
use crate::document::ResourceDocument;
use crate::error::TransformError;
use std::collections::HashSet;

/// Places namespace-scoped documents in one namespace.
///
/// Cluster-scoped kinds are left untouched.
#[derive(Debug, Clone)]
pub struct NamespaceTransformer {
    namespace: String,
    cluster_scoped_kinds: HashSet<String>,
}

impl NamespaceTransformer {
    /// Fails on an empty or non DNS-1123 namespace
    pub fn new(namespace: impl Into<String>) -> Result<Self, TransformError> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(TransformError::EmptyNamespace);
        }
        validate_dns1123_label(&namespace)?;
        Ok(Self {
            namespace,
            cluster_scoped_kinds: HashSet::new(),
        })
    }

    /// Extra kinds, beyond the built-in table, to treat as cluster-scoped
    #[must_use]
    pub fn with_cluster_scoped_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_scoped_kinds
            .extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_cluster_scoped(&self, doc: &ResourceDocument) -> bool {
        doc.resource_kind().policy().cluster_scoped || self.cluster_scoped_kinds.contains(doc.kind())
    }
}

impl Transformer for NamespaceTransformer {
    fn transform(&self, documents: &mut [ResourceDocument]) -> Result<(), TransformError> {
        for doc in documents.iter_mut() {
            if !self.is_cluster_scoped(doc) {
                doc.set_namespace(self.namespace.as_str());
            }
        }
        Ok(())
    }
}
