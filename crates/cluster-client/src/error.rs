//! Cluster client errors

use thiserror::Error;

/// Errors returned by cluster object operations
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the object changed underneath us
    #[error("Conflict: {0}")]
    Conflict(String),

    /// API server returned an error status
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Kind is not served by the API server
    #[error("Unknown kind: {0}")]
    UnknownKind(String),

    /// Object could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object returned by the API server lacks identity fields
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Transport or client-side failure
    #[error("Kubernetes client error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClusterError {
    /// 409 responses and optimistic-concurrency failures
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Retrying the whole pass may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Conflict(_) | ClusterError::Kube(_) => true,
            ClusterError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => ClusterError::NotFound(response.message.clone()),
                409 => ClusterError::Conflict(response.message.clone()),
                code => ClusterError::Api {
                    code,
                    message: response.message.clone(),
                },
            },
            other => ClusterError::Kube(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClusterError::Conflict("rv".into()).is_transient());
        assert!(ClusterError::Api { code: 503, message: "unavailable".into() }.is_transient());
        assert!(ClusterError::Api { code: 429, message: "slow down".into() }.is_transient());
        assert!(!ClusterError::Api { code: 422, message: "invalid".into() }.is_transient());
        assert!(!ClusterError::UnknownKind("Foo".into()).is_transient());
        assert!(ClusterError::NotFound("x".into()).is_not_found());
    }
}
