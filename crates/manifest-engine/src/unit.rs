//! The document set for one reconciliation pass.

use crate::document::ResourceDocument;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationUnit {
    documents: Vec<ResourceDocument>,
    excluded: Vec<ResourceDocument>,
    excluded_kinds: BTreeSet<String>,
}

impl ReconciliationUnit {
    /// Builds a unit, setting aside documents whose kind is excluded
    pub fn new(documents: Vec<ResourceDocument>, excluded_kinds: BTreeSet<String>) -> Self {
        let (excluded, documents): (Vec<_>, Vec<_>) = documents
            .into_iter()
            .partition(|d| excluded_kinds.contains(d.kind()));
        Self {
            documents,
            excluded,
            excluded_kinds,
        }
    }

    pub fn documents(&self) -> &[ResourceDocument] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<ResourceDocument> {
        self.documents
    }

    /// Rendered documents of excluded kinds; never applied, only used to
    /// find objects left over from an earlier spec
    pub fn excluded_documents(&self) -> &[ResourceDocument] {
        &self.excluded
    }

    pub fn excluded_kinds(&self) -> &BTreeSet<String> {
        &self.excluded_kinds
    }

    pub fn is_excluded(&self, kind: &str) -> bool {
        self.excluded_kinds.contains(kind)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// First document of `kind`
    pub fn find_kind(&self, kind: &str) -> Option<&ResourceDocument> {
        self.documents.iter().find(|d| d.kind() == kind)
    }
}
