//! Controller-specific error types.
//!
//! Raw errors are logged; only [`ControllerError::summary`] reaches the
//! Distribution status.

use crate::reconciler::apply::ApplyError;
use cluster_client::ClusterError;
use kube::Error as KubeError;
use manifest_engine::RenderError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the Distribution Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside the apply path
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster access error outside the apply path
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Template tree could not be rendered
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    /// Rendered unit could not be applied
    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    /// Invalid operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Distribution spec cannot be reconciled as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Pass exceeded the reconcile deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe and metrics endpoint could not be served
    #[error("Telemetry server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Write conflicts are resolved by re-running the pass soon
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Apply(e) => e.is_conflict(),
            ControllerError::Cluster(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Short classified message for `status.message`
    pub fn summary(&self) -> String {
        match self {
            ControllerError::InvalidSpec(reason) => reason.clone(),
            ControllerError::Render(RenderError::Transform(_)) => {
                "Instance name or namespace is not a valid object name".to_string()
            }
            ControllerError::Render(_) => "Failed to render manifests".to_string(),
            ControllerError::Apply(ApplyError::Scope { kind, .. }) => {
                format!("Resource kind {kind} is not served by the cluster")
            }
            ControllerError::Apply(ApplyError::Conflict { .. }) => {
                "Conflicting update, retrying".to_string()
            }
            ControllerError::Apply(ApplyError::InvalidDocument { .. }) => {
                "Rendered manifest was rejected by the cluster".to_string()
            }
            ControllerError::Apply(ApplyError::Transient { .. })
            | ControllerError::Cluster(_)
            | ControllerError::Kube(_) => "Cluster API request failed, retrying".to_string(),
            ControllerError::Timeout(_) => "Reconciliation timed out".to_string(),
            ControllerError::InvalidConfig(_)
            | ControllerError::Watch(_)
            | ControllerError::Server(_)
            | ControllerError::Metrics(_) => "Operator configuration error".to_string(),
        }
    }

    /// Metric label for the error counter
    pub fn category(&self) -> &'static str {
        match self {
            ControllerError::InvalidSpec(_) => "invalid_spec",
            ControllerError::Render(_) => "render",
            ControllerError::Apply(ApplyError::Conflict { .. }) => "conflict",
            ControllerError::Apply(_) => "apply",
            ControllerError::Kube(_) | ControllerError::Cluster(_) => "cluster",
            ControllerError::Timeout(_) => "timeout",
            ControllerError::InvalidConfig(_)
            | ControllerError::Watch(_)
            | ControllerError::Server(_)
            | ControllerError::Metrics(_) => "operator",
        }
    }
}
