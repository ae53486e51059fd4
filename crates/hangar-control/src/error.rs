//! Error types for hangar-control.

use hangar_state::{KvError, StateError};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// No deployment with this name is registered.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// The deployment exists but has no SFTP port assigned.
    #[error("deployment {0} has no sftp port assigned")]
    NoSftpPort(String),

    /// No file-edit session with this id exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session pod did not become ready.
    #[error("pod {pod} not ready: {reason}")]
    PodNotReady {
        /// Pod name.
        pod: String,
        /// Why readiness was not reached.
        reason: String,
    },

    /// No persistent volume claim matched the deployment's selector.
    #[error("no persistent volume claim matches {selector}")]
    PvcNotFound {
        /// Label selector used for the lookup.
        selector: String,
    },

    /// A deployment or manifest with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Deployment names must be DNS labels.
    #[error("invalid deployment name: {0}")]
    InvalidName(String),

    /// The infra engine failed to apply a stack.
    #[error("apply failed for stack {stack}: {reason}")]
    ApplyFailed {
        /// Stack name.
        stack: String,
        /// Failure reported by the engine.
        reason: String,
    },

    /// A manifest file could not be removed.
    #[error("failed to delete manifest {path}: {source}")]
    DeleteFailed {
        /// Manifest path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest file could not be parsed.
    #[error("invalid manifest {path}: {reason}")]
    Manifest {
        /// Manifest path.
        path: String,
        /// Parse failure.
        reason: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared state store error.
    #[error("state store error: {0}")]
    Kv(#[from] KvError),

    /// Shared state store could not be set up.
    #[error("state configuration error: {0}")]
    State(#[from] StateError),

    /// Cluster API error.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an apply failure for a stack.
    #[must_use]
    pub fn apply_failed(stack: impl Into<String>, reason: impl ToString) -> Self {
        Self::ApplyFailed {
            stack: stack.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a cluster error.
    #[must_use]
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for every error that means "the thing asked for does not exist".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeploymentNotFound(_)
                | Self::NoSftpPort(_)
                | Self::SessionNotFound(_)
                | Self::PvcNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialisation(e.to_string())
    }
}

impl From<serde_yaml::Error> for ControlError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialisation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(ControlError::DeploymentNotFound("lobby".into()).is_not_found());
        assert!(ControlError::NoSftpPort("lobby".into()).is_not_found());
        assert!(ControlError::PvcNotFound {
            selector: "app=lobby".into()
        }
        .is_not_found());
        assert!(!ControlError::AlreadyExists("lobby".into()).is_not_found());
        assert!(!ControlError::apply_failed("scalable-lobby", "boom").is_not_found());
    }

    #[test]
    fn apply_failed_message_names_stack() {
        let err = ControlError::apply_failed("proxy-deployments", "quota exceeded");
        assert_eq!(
            err.to_string(),
            "apply failed for stack proxy-deployments: quota exceeded"
        );
    }
}
