//! Sidecar error types

use std::time::Duration;

use plx_agent::AgentError;
use plx_common::error::{Retryable, UserFacing};
use thiserror::Error;

/// Sidecar failures
#[derive(Debug, Error)]
pub enum SidecarError {
    /// The main container cannot be observed; the sidecar must stop
    #[error("container error: {0}")]
    Container(String),

    /// The final flush did not finish within the grace window
    #[error("final flush timed out after {0:?}")]
    Timeout(Duration),

    /// The loop was cancelled before the main container finished
    #[error("sidecar cancelled")]
    Cancelled,

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Status report failed
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Filesystem or serialization error
    #[error(transparent)]
    Common(#[from] plx_common::Error),
}

impl From<serde_json::Error> for SidecarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Common(err.into())
    }
}

impl Retryable for SidecarError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(response)) => response.code >= 500 || response.code == 429,
            Self::Kube(_) => true,
            Self::Agent(e) => e.is_retryable(),
            Self::Common(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl UserFacing for SidecarError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Container(_) => "ContainerError",
            Self::Timeout(_) => "TimeoutError",
            Self::Cancelled => "CancelledError",
            Self::Kube(_) => "KubernetesError",
            Self::Agent(e) => e.kind(),
            Self::Common(e) => e.kind(),
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Common(e) => e.path(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> SidecarError {
        SidecarError::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "nope".into(),
            reason: "Reason".into(),
            code,
        }))
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(api_error(503).is_retryable());
        assert!(!api_error(404).is_retryable());
        assert!(!SidecarError::Container("gone".into()).is_retryable());
    }

    #[test]
    fn timeout_is_described() {
        let err = SidecarError::Timeout(Duration::from_secs(30));
        assert_eq!(err.describe()["kind"], "TimeoutError");
    }
}
