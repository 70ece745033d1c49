//! Instance-scoping transforms applied after composition

mod name_prefix;
mod namespace;

pub use name_prefix::NamePrefixTransformer;
pub use namespace::NamespaceTransformer;

use crate::document::ResourceDocument;
use crate::error::TransformError;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a DNS-1123 label
pub const DNS1123_LABEL_MAX_LENGTH: usize = 63;

static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap_or_else(|e| panic!("invalid DNS-1123 pattern: {e}"))
});

/// A pass over the whole rendered document set
pub trait Transformer {
    fn transform(&self, documents: &mut [ResourceDocument]) -> Result<(), TransformError>;
}

/// Validates a name against DNS-1123 label rules
pub fn validate_dns1123_label(value: &str) -> Result<(), TransformError> {
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        return Err(TransformError::InvalidName {
            value: value.to_string(),
            reason: format!("must be no more than {DNS1123_LABEL_MAX_LENGTH} characters"),
        });
    }
    if !DNS1123_LABEL.is_match(value) {
        return Err(TransformError::InvalidName {
            value: value.to_string(),
            reason: "must consist of lower case alphanumeric characters or '-', \
                     and must start and end with an alphanumeric character"
                .to_string(),
        });
    }
    Ok(())
}
