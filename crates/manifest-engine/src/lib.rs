//! Kind-agnostic manifest rendering.
//!
//! Composes a layered template tree into [`ResourceDocument`]s, applies the
//! instance-scoping transforms and path-addressed field mappings, and hands
//! the result to callers as a [`ReconciliationUnit`]. Nothing in this crate
//! talks to a cluster.

pub mod document;
pub mod error;
pub mod filesystem;
pub mod kind;
pub mod kustomize;
pub mod mutator;
pub mod path;
pub mod renderer;
pub mod transform;
pub mod unit;

pub use document::{GroupVersionKind, ObjectIdentity, OwnerLink, ResourceDocument};
pub use error::{MutationError, RenderError, TransformError};
pub use filesystem::{DiskFs, FileSystem, MemoryFs};
pub use kind::{BindingReferent, KindPolicy, ResourceKind};
pub use kustomize::Kustomizer;
pub use mutator::{FieldMapping, FieldMutator};
pub use path::{FieldPath, PathError, PathSegment};
pub use renderer::{RenderRequest, render};
pub use transform::{NamePrefixTransformer, NamespaceTransformer, Transformer, validate_dns1123_label};
pub use unit::ReconciliationUnit;
