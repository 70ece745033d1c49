//! Builds the per-instance render request from a Distribution.
//!
//! The template tree carries the shape of every managed object; everything
//! that depends on the instance spec is written by field mappings so the
//! templates stay free of conditionals.

use crate::config::{DistributionImages, OperatorConfig};
use crate::error::ControllerError;
use crds::{Distribution, DistributionRef, DEFAULT_STORAGE_SIZE, KIND};
use kube::ResourceExt;
use manifest_engine::{FieldMapping, RenderRequest};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Environment variable pointing the server at its data directory
pub const HOME_ENV_VAR: &str = "DISTRIBUTION_HOME";
/// Volume backing the data directory (claim or emptyDir)
pub const STORAGE_VOLUME: &str = "distribution-storage";
/// Volume projecting the user configuration ConfigMap
pub const USER_CONFIG_VOLUME: &str = "user-config";
/// Mount point of the user configuration
pub const USER_CONFIG_MOUNT_PATH: &str = "/etc/distribution/";
/// Server config file inside the user configuration ConfigMap
pub const USER_CONFIG_FILE: &str = "/etc/distribution/run.yaml";

const CONTAINER: &str = "/spec/template/spec/containers/0";
/// Hex characters of the namespace digest used in cluster-scoped names
const SCOPE_HASH_LEN: usize = 8;

/// Short stable digest of a namespace, so cluster-scoped objects of
/// same-named instances in different namespaces get distinct names
pub fn scope_hash(namespace: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(namespace.as_bytes()));
    digest.truncate(SCOPE_HASH_LEN);
    digest
}

/// Picks the server image: a distribution name through the image table, or
/// a verbatim image, never both.
pub fn resolve_image(
    distribution: &DistributionRef,
    images: &DistributionImages,
) -> Result<String, ControllerError> {
    let name = distribution.name.as_deref().filter(|n| !n.is_empty());
    let image = distribution.image.as_deref().filter(|i| !i.is_empty());
    match (name, image) {
        (Some(_), Some(_)) => Err(ControllerError::InvalidSpec(
            "only one of distribution.name or distribution.image can be set".to_string(),
        )),
        (Some(name), None) => images.get(name).map(str::to_string).ok_or_else(|| {
            ControllerError::InvalidSpec(format!("unknown distribution name: {name}"))
        }),
        (None, Some(image)) => Ok(image.to_string()),
        (None, None) => Err(ControllerError::InvalidSpec(
            "either distribution.name or distribution.image must be set".to_string(),
        )),
    }
}

/// Kinds left out of the unit for this spec
pub fn excluded_kinds(distribution: &Distribution, config: &OperatorConfig) -> BTreeSet<String> {
    let mut excluded = BTreeSet::new();
    if !distribution.has_storage() {
        excluded.insert("PersistentVolumeClaim".to_string());
    }
    if !distribution.network_policy_enabled(config.enable_network_policy) {
        excluded.insert("NetworkPolicy".to_string());
    }
    excluded
}

/// Everything `manifest_engine::render` needs for one instance
pub fn build_request(
    distribution: &Distribution,
    config: &OperatorConfig,
) -> Result<RenderRequest, ControllerError> {
    let name = distribution.name_any();
    let namespace = distribution.namespace_or_default();
    let image = resolve_image(&distribution.spec.server.distribution, &config.images)?;
    let container = &distribution.spec.server.container_spec;
    let port = distribution.container_port();

    let mut request = RenderRequest::new()
        .name_prefix(name.as_str())
        .prefix_exclude_kind(KIND)
        .namespace(namespace.as_str())
        .variable("INSTANCE_NAME", name.as_str())
        .variable("INSTANCE_NAMESPACE", namespace.as_str())
        .variable("INSTANCE_SCOPE_HASH", scope_hash(&namespace))
        .variable("CONTAINER_NAME", distribution.container_name())
        .variable("CONTAINER_PORT", port.to_string())
        .variable("SERVICE_ACCOUNT_NAME", distribution.service_account_name())
        .variable("OPERATOR_NAMESPACE", config.operator_namespace.as_str());

    let mappings = vec![
        mapping("PersistentVolumeClaim", "/spec/resources/requests/storage")?
            .source(distribution.storage_size().unwrap_or_default())
            .default_value(DEFAULT_STORAGE_SIZE),
        mapping("ClusterRoleBinding", "/subjects/0/namespace")?.source(namespace.as_str()),
        mapping("ClusterRoleBinding", "/subjects/0/name")?.source(format!("{name}-sa")),
        mapping("Deployment", &format!("{CONTAINER}/image"))?.source(image),
        mapping("Deployment", "/spec/replicas")?.source(distribution.spec.replicas),
        mapping("Service", "/spec/ports/0/targetPort")?.source(port),
        mapping("Service", "/spec/ports/0/port")?.source(port),
        mapping("Deployment", &format!("{CONTAINER}/resources"))?
            .source(to_value(&container.resources)?),
        mapping("Deployment", &format!("{CONTAINER}/env"))?.source(env(distribution)?),
        mapping("Deployment", &format!("{CONTAINER}/command"))?
            .source(to_value(&container.command)?),
        mapping("Deployment", &format!("{CONTAINER}/args"))?.source(args(distribution)),
        mapping("Deployment", &format!("{CONTAINER}/volumeMounts"))?
            .source(volume_mounts(distribution)?),
        mapping("Deployment", "/spec/template/spec/volumes")?.source(volumes(distribution)?),
        mapping("Deployment", "/spec/template/spec/serviceAccountName")?
            .source(distribution.service_account_name()),
    ];
    for m in mappings {
        request = request.mapping(m.create_if_not_exists(true));
    }
    for kind in excluded_kinds(distribution, config) {
        request = request.exclude_kind(kind);
    }
    Ok(request)
}

fn mapping(kind: &str, path: &str) -> Result<FieldMapping, ControllerError> {
    FieldMapping::new(kind, path).map_err(|e| ControllerError::Render(e.into()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ControllerError> {
    serde_json::to_value(value)
        .map_err(|e| ControllerError::InvalidSpec(format!("spec could not be encoded: {e}")))
}

/// Home directory variable first, then the user's variables
fn env(distribution: &Distribution) -> Result<Value, ControllerError> {
    let mut env = vec![json!({ "name": HOME_ENV_VAR, "value": distribution.mount_path() })];
    for var in &distribution.spec.server.container_spec.env {
        env.push(to_value(var)?);
    }
    Ok(Value::Array(env))
}

/// Explicit args win; otherwise point the server at the mounted config file
fn args(distribution: &Distribution) -> Value {
    let container = &distribution.spec.server.container_spec;
    if !container.args.is_empty() {
        return json!(container.args);
    }
    if distribution.user_config_ref().is_some() {
        return json!(["--config", USER_CONFIG_FILE]);
    }
    Value::Null
}

fn volume_mounts(distribution: &Distribution) -> Result<Value, ControllerError> {
    let mut mounts = vec![json!({ "name": STORAGE_VOLUME, "mountPath": distribution.mount_path() })];
    if distribution.user_config_ref().is_some() {
        mounts.push(json!({
            "name": USER_CONFIG_VOLUME,
            "mountPath": USER_CONFIG_MOUNT_PATH,
            "readOnly": true,
        }));
    }
    if let Some(overrides) = &distribution.spec.server.pod_overrides {
        for mount in &overrides.volume_mounts {
            mounts.push(to_value(mount)?);
        }
    }
    Ok(Value::Array(mounts))
}

fn volumes(distribution: &Distribution) -> Result<Value, ControllerError> {
    let storage = if distribution.has_storage() {
        json!({
            "name": STORAGE_VOLUME,
            "persistentVolumeClaim": { "claimName": format!("{}-pvc", distribution.name_any()) },
        })
    } else {
        json!({ "name": STORAGE_VOLUME, "emptyDir": {} })
    };
    let mut volumes = vec![storage];
    if let Some((_, config_map)) = distribution.user_config_ref() {
        volumes.push(json!({
            "name": USER_CONFIG_VOLUME,
            "configMap": { "name": config_map },
        }));
    }
    if let Some(overrides) = &distribution.spec.server.pod_overrides {
        for volume in &overrides.volumes {
            volumes.push(to_value(volume)?);
        }
    }
    Ok(Value::Array(volumes))
}
