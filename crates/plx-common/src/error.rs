//! Error types shared across plx crates
//!
//! Crate-specific errors wrap this one. The variants here cover the ambient
//! concerns (configuration, IO, serialization) that every layer can hit.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for the shared layer
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem error with the offending path
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid or missing configuration value
    #[error("configuration error [{key}]: {message}")]
    Config {
        /// Configuration key or environment variable
        key: String,
        /// Description of what is wrong
        message: String,
    },

    /// Template rendering failed
    #[error(transparent)]
    Template(#[from] crate::template::TemplateError),
}

impl Error {
    /// Create an IO error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error without kind context
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific document kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Errors that know whether retrying the failed operation can help.
///
/// Drives [`crate::retry::retry_with_backoff`]: non-retryable errors are
/// returned on the first failure.
pub trait Retryable {
    /// Whether the operation that produced this error may succeed on retry
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Errors that can be shown to users as `{kind, path, message}`.
pub trait UserFacing {
    /// Short machine-readable error kind, e.g. `SchemaError`
    fn kind(&self) -> &'static str;

    /// Document path the error refers to, when known
    fn path(&self) -> Option<String> {
        None
    }

    /// Render the `{kind, path, message}` triple as a JSON object
    fn describe(&self) -> serde_json::Value
    where
        Self: std::fmt::Display,
    {
        serde_json::json!({
            "kind": self.kind(),
            "path": self.path().unwrap_or_else(|| UNKNOWN_CONTEXT.to_string()),
            "message": self.to_string(),
        })
    }
}

impl UserFacing for Error {
    fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "IoError",
            Self::Serialization { .. } => "SerializationError",
            Self::Config { .. } => "ConfigError",
            Self::Template(_) => "TemplateError",
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Io { path, .. } => Some(path.display().to_string()),
            Self::Config { key, .. } => Some(key.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_contains_key() {
        let err = Error::config("POLYAXON_HOME", "not a directory");
        assert!(err.to_string().contains("POLYAXON_HOME"));
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn describe_carries_kind_path_and_message() {
        let err = Error::config("POLYAXON_AGENT_INSTANCE", "bad format");
        let described = err.describe();
        assert_eq!(described["kind"], "ConfigError");
        assert_eq!(described["path"], "POLYAXON_AGENT_INSTANCE");
        assert!(described["message"].as_str().unwrap().contains("bad format"));
    }

    #[test]
    fn only_io_errors_are_retryable() {
        let io = Error::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(io.is_retryable());
        assert!(!Error::serialization("bad").is_retryable());
    }
}
