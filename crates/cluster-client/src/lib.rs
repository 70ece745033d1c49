//! Cluster access for the distribution operator
//!
//! Object operations are expressed over [`ResourceDocument`]s so the apply
//! algorithm stays kind-agnostic. [`KubeClusterClient`] resolves each kind
//! through API discovery; [`MockClusterClient`] (feature `test-util`) keeps
//! objects in memory and records every call.
//!
//! [`ResourceDocument`]: manifest_engine::ResourceDocument

pub mod client;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ClusterClient, ScopeResolver};
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, Operation, RecordedCall};
