//! Manifest engine errors

use crate::path::PathError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while rendering the template tree.
///
/// Any of these aborts the whole render; no partial document set is returned.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A composition or resource file referenced by the tree does not exist
    #[error("missing file: {}", .0.display())]
    MissingFile(PathBuf),

    /// A file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is not valid YAML for its role
    #[error("malformed {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A rendered document lacks apiVersion, kind or metadata.name
    #[error("invalid document in {}: {reason}", path.display())]
    InvalidDocument { path: PathBuf, reason: String },

    /// A `$(NAME)` token had no value
    #[error("unresolved variable $({name}) in {}", path.display())]
    UnresolvedVariable { path: PathBuf, name: String },

    /// A patch matched no rendered document
    #[error("patch {} matches no resource", path.display())]
    PatchTargetNotFound { path: PathBuf },

    /// Two documents share the same identity
    #[error("duplicate resource {0}")]
    DuplicateResource(String),

    /// A composition includes itself, directly or through its bases
    #[error("composition cycle through {}", .0.display())]
    Cycle(PathBuf),

    /// Name prefix or namespace placement rejected the document set
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A field mapping could not be applied
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Errors raised by the field mutation engine.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The target field string is not a valid path
    #[error("invalid target field {field:?}: {reason}")]
    InvalidPath { field: String, reason: String },

    /// The mapping could not be applied to a document
    #[error("failed to set {path} on {kind}/{name}: {source}")]
    Field {
        kind: String,
        name: String,
        path: String,
        #[source]
        source: PathError,
    },
}

/// Errors raised by the scoping transforms.
///
/// Raised before any document is modified.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A computed name or the configured namespace violates DNS-1123 label rules
    #[error("invalid name {value:?}: {reason}")]
    InvalidName { value: String, reason: String },

    /// Namespace transform constructed without a namespace
    #[error("namespace cannot be empty")]
    EmptyNamespace,
}
