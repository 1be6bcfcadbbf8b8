//! Error types for chartops-kube

use thiserror::Error;

/// Result type for chartops-kube operations
pub type Result<T> = std::result::Result<T, ChartError>;

/// Errors that can occur while driving chart transitions
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChartError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Catalog action rejected by the Rancher API
    #[error("catalog request failed with status {status}: {message}")]
    Catalog { status: u16, message: String },

    /// Transport error while talking to the catalog API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A watch predicate reported a terminal failure
    #[error("{resource}: {message}")]
    Rejected { resource: String, message: String },

    /// A watched object could not be decoded
    #[error("failed to decode {resource}: {message}")]
    Decode { resource: String, message: String },

    /// The target state was never observed within the wait budget
    #[error("timed out after {waited} waiting for {resource}")]
    Timeout { resource: String, waited: String },

    /// Resource not found
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// One or more cleanup bundles failed during teardown
    #[error("{failed} of {total} cleanup bundle(s) failed:\n  {}", .failures.join("\n  "))]
    Cleanup {
        failed: usize,
        total: usize,
        failures: Vec<String>,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ChartError {
    fn from(e: serde_json::Error) -> Self {
        ChartError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ChartError {
    fn from(e: serde_yaml::Error) -> Self {
        ChartError::Serialization(e.to_string())
    }
}

impl ChartError {
    /// Check if the error means the resource does not exist
    ///
    /// A bare catalog 404 does not count: the Steve API also answers 404 for
    /// an unknown cluster, so callers confirm absence before reporting `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            ChartError::Api(kube::Error::Api(resp)) => resp.code == 404,
            ChartError::NotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if the wait budget elapsed without reaching the target state
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChartError::Timeout { .. })
    }

    /// Check if a watch predicate or decode step rejected the event stream
    pub fn is_rejected(&self) -> bool {
        matches!(self, ChartError::Rejected { .. } | ChartError::Decode { .. })
    }
}
