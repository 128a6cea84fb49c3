//! Converter error types

use plx_common::error::UserFacing;
use plx_schema::SchemaError;
use thiserror::Error;

/// Conversion failures; no partial artifact is produced on any of them
#[derive(Debug, Error)]
pub enum ConverterError {
    /// Two requesters mount the same connection volume differently
    #[error("volume `{volume}` conflict: {reason}")]
    VolumeConflict {
        /// Generated volume name
        volume: String,
        /// Connection requesting the volume
        connection: String,
        /// What disagrees
        reason: String,
    },

    /// The backend has no converter for the run kind
    #[error("backend `{backend}` does not support run kind `{kind}`")]
    UnsupportedRunKind {
        /// Backend name
        backend: String,
        /// Run kind
        kind: String,
    },

    /// Accelerator requests could not be interpreted
    #[error("cannot infer accelerators from `{key}`: {message}")]
    AccelInference {
        /// Resource or annotation key
        key: String,
        /// What is wrong
        message: String,
    },

    /// A requested connection is missing from the connection table
    #[error("unknown connection `{name}` requested by {requester}")]
    UnknownConnection {
        /// Connection name
        name: String,
        /// Container or init requesting it
        requester: String,
    },

    /// Any other conversion failure
    #[error("conversion failed at `{path}`: {message}")]
    Converter {
        /// Path of the offending run section
        path: String,
        /// Description
        message: String,
    },

    /// Unresolved or invalid run fields
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Serialization of the output failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ConverterError {
    /// Create a generic conversion error
    pub fn converter(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Converter {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConverterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConverterError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl UserFacing for ConverterError {
    fn kind(&self) -> &'static str {
        match self {
            Self::VolumeConflict { .. } => "VolumeConflictError",
            Self::UnsupportedRunKind { .. } => "UnsupportedRunKind",
            Self::AccelInference { .. } => "AccelInferenceError",
            Self::UnknownConnection { .. } => "UnknownConnectionError",
            Self::Converter { .. } | Self::Serialization(_) => "ConverterError",
            Self::Schema(e) => e.kind(),
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::VolumeConflict { connection, .. } => Some(format!("connections.{}", connection)),
            Self::UnknownConnection { name, .. } => Some(format!("connections.{}", name)),
            Self::AccelInference { key, .. } => Some(key.clone()),
            Self::Converter { path, .. } => Some(path.clone()),
            Self::Schema(e) => e.path(),
            _ => None,
        }
    }
}
