//! Errors raised while talking to the cluster.

use std::time::Duration;

/// Failure of a single call against the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The API server rejected or failed the request.
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The call did not finish within the configured timeout.
    #[error("Kubernetes API call timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// A custom resource could not be converted to its wire form.
    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        source: serde_json::Error,
    },

    /// Failure reported by a non-HTTP backend.
    #[cfg_attr(not(test), allow(dead_code))] // Only the in-memory cluster raises it
    #[error("{message}")]
    Rejected { message: String },
}

impl ClusterError {
    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `Rejected` error.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// HTTP status code returned by the API server, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Returns true if the object did not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Returns true if the object already existed.
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Returns true if this is a timeout error.
    #[allow(dead_code)] // Public API for callers
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
