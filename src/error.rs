//! Domain-specific error types for sandbox operations.
//!
//! Typed errors let the CLI tell caller mistakes (bad identity, missing
//! sandbox, wrong token) apart from cluster failures.

use crate::cluster::ClusterError;
use crate::identity::InvalidIdentity;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The user ID is not a valid DNS label.
    #[error("Invalid user ID: {reason}")]
    InvalidIdentity { reason: String },

    /// No deployment exists for the user.
    #[error("No sandbox found for user {user_id}")]
    NotFound { user_id: String },

    /// Configuration refers to something the cluster does not provide.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// The on-demand sweep token did not match.
    #[error("Unauthorized: cleanup token rejected")]
    Unauthorized,

    /// A cluster call failed.
    #[error("Failed to {step}: {source}")]
    Upstream {
        step: String,
        #[source]
        source: ClusterError,
    },
}

impl SandboxError {
    /// Creates a `NotFound` error.
    pub fn not_found(user_id: impl Into<String>) -> Self {
        Self::NotFound {
            user_id: user_id.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an `Upstream` error naming the step that failed.
    pub fn upstream(step: impl Into<String>, source: ClusterError) -> Self {
        Self::Upstream {
            step: step.into(),
            source,
        }
    }

    /// Returns true if the caller supplied a malformed identity.
    #[allow(dead_code)] // Public API for callers
    pub fn is_invalid_identity(&self) -> bool {
        matches!(self, Self::InvalidIdentity { .. })
    }

    /// Returns true if the sandbox does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the configuration could not be applied.
    #[allow(dead_code)] // Public API for callers
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if the sweep token was rejected.
    #[allow(dead_code)] // Public API for callers
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true if a cluster call failed.
    #[allow(dead_code)] // Public API for callers
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

impl From<InvalidIdentity> for SandboxError {
    fn from(err: InvalidIdentity) -> Self {
        Self::InvalidIdentity {
            reason: err.to_string(),
        }
    }
}
