//! Closed set of object kinds the operator renders, with per-kind apply
//! behaviour looked up from a single strategy table.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Service,
    NetworkPolicy,
    PersistentVolumeClaim,
    ConfigMap,
    Secret,
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    Namespace,
    Distribution,
    Other(String),
}

/// How the applier treats a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindPolicy {
    /// Never carries a namespace; scope is still confirmed with the cluster
    /// for kinds outside the table
    pub cluster_scoped: bool,
    /// Created once, never patched afterwards
    pub immutable_after_create: bool,
    /// Live `spec.selector` is kept on patch
    pub preserve_selector: bool,
    /// Binding whose `roleRef` must exist before apply
    pub binding_referent: Option<BindingReferent>,
}

/// Referent kind looked up for binding-like objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingReferent {
    /// Same namespace as the binding
    Role,
    ClusterRole,
}

impl ResourceKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Deployment" => Self::Deployment,
            "Service" => Self::Service,
            "NetworkPolicy" => Self::NetworkPolicy,
            "PersistentVolumeClaim" => Self::PersistentVolumeClaim,
            "ConfigMap" => Self::ConfigMap,
            "Secret" => Self::Secret,
            "ServiceAccount" => Self::ServiceAccount,
            "Role" => Self::Role,
            "RoleBinding" => Self::RoleBinding,
            "ClusterRole" => Self::ClusterRole,
            "ClusterRoleBinding" => Self::ClusterRoleBinding,
            "Namespace" => Self::Namespace,
            "Distribution" => Self::Distribution,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::ServiceAccount => "ServiceAccount",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Namespace => "Namespace",
            Self::Distribution => "Distribution",
            Self::Other(kind) => kind,
        }
    }

    pub fn policy(&self) -> KindPolicy {
        match self {
            Self::ClusterRole | Self::Namespace => KindPolicy {
                cluster_scoped: true,
                ..KindPolicy::default()
            },
            Self::ClusterRoleBinding => KindPolicy {
                cluster_scoped: true,
                binding_referent: Some(BindingReferent::ClusterRole),
                ..KindPolicy::default()
            },
            Self::RoleBinding => KindPolicy {
                binding_referent: Some(BindingReferent::Role),
                ..KindPolicy::default()
            },
            Self::PersistentVolumeClaim => KindPolicy {
                immutable_after_create: true,
                ..KindPolicy::default()
            },
            Self::Deployment => KindPolicy {
                preserve_selector: true,
                ..KindPolicy::default()
            },
            _ => KindPolicy::default(),
        }
    }
}

impl BindingReferent {
    pub fn kind(self) -> &'static str {
        match self {
            Self::Role => "Role",
            Self::ClusterRole => "ClusterRole",
        }
    }

    pub fn namespaced(self) -> bool {
        matches!(self, Self::Role)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
