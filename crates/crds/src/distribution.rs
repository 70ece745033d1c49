//! Distribution CRD
//!
//! Declares one serving deployment unit: a server image (picked by
//! distribution name or given directly), its container settings, optional
//! persistent storage, an optional shared configuration reference, and
//! pod-level overrides.

use crate::conditions::DistributionCondition;
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the Distribution CRD
pub const API_GROUP: &str = "distro.microscaler.io";
/// API version of the Distribution CRD
pub const API_VERSION: &str = "v1alpha1";
/// Kind of the Distribution CRD
pub const KIND: &str = "Distribution";

/// Port the server listens on when `containerSpec.port` is unset
pub const DEFAULT_SERVER_PORT: i32 = 8321;
/// Container name used when `containerSpec.name` is unset
pub const DEFAULT_CONTAINER_NAME: &str = "distribution-server";
/// Mount path of the storage volume when `storage.mountPath` is unset
pub const DEFAULT_MOUNT_PATH: &str = "/.distribution";
/// Storage request used when `storage.size` is unset
pub const DEFAULT_STORAGE_SIZE: &str = "10Gi";

/// Field path exposed as a CRD selectable field so that instances can be
/// listed server-side by the name of the ConfigMap they reference.
pub const USER_CONFIG_NAME_FIELD: &str = ".spec.server.userConfig.configMapName";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "distro.microscaler.io",
    version = "v1alpha1",
    kind = "Distribution",
    namespaced,
    status = "DistributionStatus",
    shortname = "dist",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSpec {
    /// Number of server replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Server configuration
    pub server: ServerSpec,

    /// Network policy settings (defaults to the operator-wide flag)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Which server image to run
    pub distribution: DistributionRef,

    /// Server container settings
    #[serde(default)]
    pub container_spec: ContainerSpec,

    /// Persistent storage; an emptyDir is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Shared configuration ConfigMap mounted into the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<UserConfigSpec>,

    /// Pod-level overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_overrides: Option<PodOverrides>,
}

/// Selects the server image. Exactly one of `name` or `image` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRef {
    /// Distribution name, resolved through the operator's image table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Image reference used verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Requested size (defaults to 10Gi)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,

    /// Where the volume is mounted in the server container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigSpec {
    /// Name of the ConfigMap holding the server configuration
    pub config_map_name: String,

    /// Namespace of the ConfigMap (defaults to the Distribution's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Whether a NetworkPolicy restricting ingress to the server is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStatus {
    /// Outcome of the latest reconciliation pass
    #[serde(default)]
    pub phase: DistributionPhase,

    /// Short human-readable summary of the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Whether the server is available and healthy
    #[serde(default)]
    pub ready: bool,

    /// Version reported by the running server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Ready replicas of the server workload
    #[serde(default)]
    pub available_replicas: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<DistributionCondition>,
}

/// Distribution lifecycle phase
///
/// Serializes as PascalCase ("Pending", "Ready", etc.).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum DistributionPhase {
    /// Resources not yet available
    #[default]
    Pending,

    /// Resources applied, server coming up
    Progressing,

    /// Server available and healthy
    Ready,

    /// Latest pass failed
    Failed,
}

impl DistributionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionPhase::Pending => "Pending",
            DistributionPhase::Progressing => "Progressing",
            DistributionPhase::Ready => "Ready",
            DistributionPhase::Failed => "Failed",
        }
    }
}

impl Distribution {
    /// Namespace of the instance (falls back to "default" like the other controllers)
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    pub fn container_name(&self) -> &str {
        self.spec
            .server
            .container_spec
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CONTAINER_NAME)
    }

    pub fn container_port(&self) -> i32 {
        match self.spec.server.container_spec.port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_SERVER_PORT,
        }
    }

    pub fn mount_path(&self) -> &str {
        self.spec
            .server
            .storage
            .as_ref()
            .and_then(|s| s.mount_path.as_deref())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_MOUNT_PATH)
    }

    /// Requested storage size, or `None` when the spec leaves it to the default
    pub fn storage_size(&self) -> Option<&str> {
        self.spec
            .server
            .storage
            .as_ref()
            .and_then(|s| s.size.as_ref())
            .map(|q| q.0.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn has_storage(&self) -> bool {
        self.spec.server.storage.is_some()
    }

    pub fn service_account_name(&self) -> String {
        self.spec
            .server
            .pod_overrides
            .as_ref()
            .and_then(|o| o.service_account_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}-sa", self.name_any()))
    }

    /// Network policy switch, falling back to the operator default
    pub fn network_policy_enabled(&self, operator_default: bool) -> bool {
        self.spec
            .network
            .as_ref()
            .and_then(|n| n.enabled)
            .unwrap_or(operator_default)
    }

    /// Resolved `(namespace, name)` of the referenced configuration ConfigMap.
    ///
    /// An explicit `configMapNamespace` wins over the instance namespace.
    pub fn user_config_ref(&self) -> Option<(String, String)> {
        let user_config = self.spec.server.user_config.as_ref()?;
        if user_config.config_map_name.is_empty() {
            return None;
        }
        let namespace = user_config
            .config_map_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace_or_default());
        Some((namespace, user_config.config_map_name.clone()))
    }
}
