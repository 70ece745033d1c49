//! Operator configuration
//!
//! Read once at startup from environment variables and handed to the
//! reconciler by value. Nothing here is global.

use crate::error::ControllerError;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OPERATOR_NAMESPACE: &str = "distribution-system";
const DEFAULT_MANIFESTS_PATH: &str = "/manifests";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Distribution name to image table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionImages(BTreeMap<String, String>);

impl DistributionImages {
    pub fn new(images: BTreeMap<String, String>) -> Self {
        Self(images)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|image| !image.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parses `raw` as a JSON object, or reads it as a path to one
    fn parse(raw: &str) -> Result<Self, ControllerError> {
        let trimmed = raw.trim();
        let text = if trimmed.starts_with('{') {
            trimmed.to_string()
        } else {
            std::fs::read_to_string(trimmed).map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "DISTRIBUTION_IMAGES file {trimmed} could not be read: {e}"
                ))
            })?
        };
        let images: BTreeMap<String, String> = serde_json::from_str(&text).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "DISTRIBUTION_IMAGES must be a JSON object of name to image: {e}"
            ))
        })?;
        Ok(Self(images))
    }
}

/// Settings shared by every reconciliation pass
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub operator_namespace: String,
    /// Root of the template tree
    pub manifests_path: PathBuf,
    pub images: DistributionImages,
    /// Network policy default for instances that do not set `network.enabled`
    pub enable_network_policy: bool,
    /// Deadline for one whole pass
    pub reconcile_timeout: Duration,
    /// Deadline for each outbound server probe
    pub probe_timeout: Duration,
    pub metrics_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            manifests_path: PathBuf::from(DEFAULT_MANIFESTS_PATH),
            images: DistributionImages::default(),
            enable_network_policy: false,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl OperatorConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let images = match var("DISTRIBUTION_IMAGES") {
            Some(raw) => DistributionImages::parse(&raw)?,
            None => DistributionImages::default(),
        };

        let enable_network_policy = match var("ENABLE_NETWORK_POLICY") {
            Some(raw) => parse_bool("ENABLE_NETWORK_POLICY", &raw)?,
            None => false,
        };

        let metrics_addr = var("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_ADDR {metrics_addr} is not a socket address: {e}"))
        })?;

        Ok(Self {
            watch_namespace: var("WATCH_NAMESPACE"),
            operator_namespace: var("OPERATOR_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_OPERATOR_NAMESPACE.to_string()),
            manifests_path: PathBuf::from(
                var("MANIFESTS_PATH").unwrap_or_else(|| DEFAULT_MANIFESTS_PATH.to_string()),
            ),
            images,
            enable_network_policy,
            reconcile_timeout: parse_secs(
                "RECONCILE_TIMEOUT_SECS",
                var("RECONCILE_TIMEOUT_SECS"),
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            )?,
            probe_timeout: parse_secs(
                "PROBE_TIMEOUT_SECS",
                var("PROBE_TIMEOUT_SECS"),
                DEFAULT_PROBE_TIMEOUT_SECS,
            )?,
            metrics_addr,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ControllerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ControllerError::InvalidConfig(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}

fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration, ControllerError> {
    let secs = match raw {
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            ControllerError::InvalidConfig(format!("{key} must be a whole number of seconds: {e}"))
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ControllerError::InvalidConfig(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config_from(vars: &[(&str, &str)]) -> Result<OperatorConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.operator_namespace, "distribution-system");
        assert_eq!(config.manifests_path, PathBuf::from("/manifests"));
        assert_eq!(config.images.len(), 0);
        assert!(!config.enable_network_policy);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(120));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.metrics_addr.port(), 8080);
    }

    #[test]
    fn test_inline_image_table() {
        let config = config_from(&[(
            "DISTRIBUTION_IMAGES",
            r#"{"starter": "registry.local/server:starter", "gpu": ""}"#,
        )])
        .unwrap();
        assert_eq!(config.images.get("starter"), Some("registry.local/server:starter"));
        assert_eq!(config.images.get("gpu"), None);
        assert_eq!(config.images.get("missing"), None);
    }

    #[test]
    fn test_image_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"starter": "registry.local/server:1.2"}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = config_from(&[("DISTRIBUTION_IMAGES", &path)]).unwrap();
        assert_eq!(config.images.get("starter"), Some("registry.local/server:1.2"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("DISTRIBUTION_IMAGES", "{not json")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[("ENABLE_NETWORK_POLICY", "maybe")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[("RECONCILE_TIMEOUT_SECS", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config_from(&[("METRICS_ADDR", "localhost")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("WATCH_NAMESPACE", "serving"),
            ("ENABLE_NETWORK_POLICY", "true"),
            ("PROBE_TIMEOUT_SECS", "2"),
            ("MANIFESTS_PATH", "/opt/manifests"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("serving"));
        assert!(config.enable_network_policy);
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.manifests_path, PathBuf::from("/opt/manifests"));
        assert_eq!(config.metrics_addr.port(), 9090);
    }
}
