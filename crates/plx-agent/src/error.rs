//! Agent error types
//!
//! Backend failures are split into transient (retried with backoff) and fatal
//! (the run fails with the original reason). Control-plane failures carry the
//! HTTP status when there is one.

use plx_common::error::{Retryable, UserFacing};
use plx_converter::ConverterError;
use thiserror::Error;

/// Executor and agent failures
#[derive(Debug, Error)]
pub enum AgentError {
    /// Backend refused for now (conflict, throttling, object not yet visible)
    #[error("transient backend error: {message}")]
    TransientBackend {
        /// Backend message
        message: String,
    },

    /// Backend refused for good (validation, forbidden)
    #[error("fatal backend error: {message}")]
    FatalBackend {
        /// Backend message
        message: String,
    },

    /// Agent misconfiguration or invariant violation
    #[error("agent error: {0}")]
    Agent(String),

    /// Missing or rejected credentials
    #[error("auth error: {0}")]
    Auth(String),

    /// Control-plane request failed
    #[error("api error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Api {
        /// HTTP status, absent for network failures
        status: Option<u16>,
        /// Description
        message: String,
    },

    /// The run could not be converted
    #[error(transparent)]
    Converter(#[from] ConverterError),

    /// Shared-layer failure (config, io)
    #[error(transparent)]
    Common(#[from] plx_common::Error),
}

impl AgentError {
    /// Create a transient backend error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientBackend {
            message: message.into(),
        }
    }

    /// Create a fatal backend error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalBackend {
            message: message.into(),
        }
    }
}

/// Statuses the API server may answer differently on the next attempt
fn is_transient_status(code: u16) -> bool {
    matches!(code, 404 | 408 | 409 | 429) || code >= 500
}

impl From<kube::Error> for AgentError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if !is_transient_status(response.code) => {
                Self::fatal(format!("{} ({})", response.message, response.reason))
            }
            _ => Self::transient(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        match status {
            Some(401) | Some(403) => Self::Auth(err.to_string()),
            _ => Self::Api {
                status,
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Agent(format!("serialization error: {}", err))
    }
}

impl Retryable for AgentError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::TransientBackend { .. } => true,
            Self::Api { status, .. } => status.map_or(true, is_transient_status),
            Self::Common(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl UserFacing for AgentError {
    fn kind(&self) -> &'static str {
        match self {
            Self::TransientBackend { .. } => "TransientBackendError",
            Self::FatalBackend { .. } => "FatalBackendError",
            Self::Agent(_) | Self::Common(_) => "AgentError",
            Self::Auth(_) => "AuthError",
            Self::Api { .. } => "ApiError",
            Self::Converter(e) => e.kind(),
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Converter(e) => e.path(),
            _ => None,
        }
    }
}
