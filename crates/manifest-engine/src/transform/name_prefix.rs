use super::{Transformer, validate_dns1123_label};
use crate::document::ResourceDocument;
use crate::error::TransformError;
use tracing::debug;

/// Renames documents to `{prefix}-{name}`.
///
/// Already-prefixed names are left alone so a retried pass does not stack
/// prefixes. Every new name is validated before any document is renamed.
#[derive(Debug, Clone)]
pub struct NamePrefixTransformer {
    prefix: String,
    include_kinds: Vec<String>,
    exclude_kinds: Vec<String>,
}

impl NamePrefixTransformer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            include_kinds: Vec::new(),
            exclude_kinds: Vec::new(),
        }
    }

    /// Restricts renaming to these kinds. Empty means every kind.
    #[must_use]
    pub fn include_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Kinds that are never renamed; takes precedence over the include list
    #[must_use]
    pub fn exclude_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    fn applies_to(&self, kind: &str) -> bool {
        if self.exclude_kinds.iter().any(|k| k == kind) {
            return false;
        }
        self.include_kinds.is_empty() || self.include_kinds.iter().any(|k| k == kind)
    }
}

impl Transformer for NamePrefixTransformer {
    fn transform(&self, documents: &mut [ResourceDocument]) -> Result<(), TransformError> {
        let marker = format!("{}-", self.prefix);
        let mut renames = Vec::new();

        for (index, doc) in documents.iter().enumerate() {
            if doc.name().starts_with(&marker) || !self.applies_to(doc.kind()) {
                continue;
            }
            let prefixed = format!("{marker}{}", doc.name());
            validate_dns1123_label(&prefixed)?;
            renames.push((index, prefixed));
        }

        for (index, name) in renames {
            let doc = &mut documents[index];
            debug!("Renaming {} {} to {}", doc.kind(), doc.name(), name);
            doc.set_name(name);
        }
        Ok(())
    }
}
