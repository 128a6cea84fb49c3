//! Error types for the CLI

use std::path::PathBuf;

use plx_common::error::UserFacing;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] plx_schema::SchemaError),

    #[error(transparent)]
    Compile(#[from] plx_compiler::CompileError),

    #[error(transparent)]
    Converter(#[from] plx_converter::ConverterError),

    #[error(transparent)]
    Agent(#[from] plx_agent::AgentError),

    #[error(transparent)]
    Sidecar(#[from] plx_sidecar::SidecarError),

    #[error(transparent)]
    Common(#[from] plx_common::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl UserFacing for Error {
    fn kind(&self) -> &'static str {
        match self {
            Self::Schema(e) => e.kind(),
            Self::Compile(e) => e.kind(),
            Self::Converter(e) => e.kind(),
            Self::Agent(e) => e.kind(),
            Self::Sidecar(e) => e.kind(),
            Self::Common(e) => e.kind(),
            Self::Kube(_) => "KubernetesError",
            Self::Git(_) => "GitError",
            Self::Io { .. } => "IoError",
            Self::Json(_) => "SerializationError",
            Self::Validation { .. } => "ValidationError",
            Self::CommandFailed { .. } => "CommandError",
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Schema(e) => e.path(),
            Self::Compile(e) => e.path(),
            Self::Converter(e) => e.path(),
            Self::Agent(e) => e.path(),
            Self::Sidecar(e) => e.path(),
            Self::Common(e) => e.path(),
            Self::Io { path, .. } => Some(path.display().to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_keep_kind_and_path() {
        let err = Error::from(plx_schema::SchemaError::missing_input("lr", "params.lr"));
        let described = err.describe();
        assert_eq!(described["kind"], err.kind());
        assert_ne!(described["path"], "unknown");
    }

    #[test]
    fn validation_has_no_path() {
        let err = Error::validation("no polyaxonfile");
        assert_eq!(err.describe()["path"], "unknown");
        assert_eq!(err.describe()["kind"], "ValidationError");
    }
}
