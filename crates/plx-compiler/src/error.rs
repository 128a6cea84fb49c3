//! Compile-layer errors
//!
//! The compiler never retries: the first failure is surfaced with the
//! document path it refers to.

use std::path::PathBuf;

use plx_common::error::UserFacing;
use plx_common::template::TemplateError;
use plx_schema::SchemaError;
use thiserror::Error;

/// Errors raised while loading, resolving or compiling an operation
#[derive(Debug, Error)]
pub enum CompileError {
    /// Document model violation
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Template rendering failed
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A component reference resolves back to itself
    #[error("reference cycle: {path}")]
    Cycle {
        /// The chain of references, `source:identifier` joined by ` -> `
        path: String,
    },

    /// A connection name is not in the connection table
    #[error("unknown connection `{name}` at `{path}`")]
    UnknownConnection {
        /// Connection name
        name: String,
        /// Where it was requested
        path: String,
    },

    /// A patch layer changes the run kind
    #[error("patch `{layer}` changes run kind from {from} to {to}")]
    PatchConflict {
        /// Layer that carried the patch
        layer: String,
        /// Kind of the component run
        from: String,
        /// Kind requested by the patch
        to: String,
    },

    /// A reference could not be fetched
    #[error("could not resolve {reference}: {message}")]
    Resolve {
        /// `source:identifier`
        reference: String,
        /// Why
        message: String,
    },

    /// Reading a document from disk failed
    #[error("io error at {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Matrix expansion failed
    #[error("matrix error at `{path}`: {message}")]
    Matrix {
        /// Path inside the matrix
        path: String,
        /// Why
        message: String,
    },
}

impl CompileError {
    /// Matrix error at a path
    pub fn matrix(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Matrix {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Resolution failure
    pub fn resolve(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            reference: reference.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Schema(SchemaError::schema("", "a valid document", err.to_string()))
    }
}

impl From<serde_yaml::Error> for CompileError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Schema(SchemaError::parse("document", err.to_string()))
    }
}

impl UserFacing for CompileError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Schema(e) => e.kind(),
            Self::Template(_) => "TemplateError",
            Self::Cycle { .. } => "CycleError",
            Self::UnknownConnection { .. } => "UnknownConnectionError",
            Self::PatchConflict { .. } => "PatchConflictError",
            Self::Resolve { .. } => "ResolveError",
            Self::Io { .. } => "IoError",
            Self::Matrix { .. } => "MatrixError",
        }
    }

    fn path(&self) -> Option<String> {
        match self {
            Self::Schema(e) => e.path(),
            Self::Cycle { path } => Some(path.clone()),
            Self::UnknownConnection { path, .. } | Self::Matrix { path, .. } => Some(path.clone()),
            Self::PatchConflict { layer, .. } => Some(format!("{}.runPatch.kind", layer)),
            Self::Resolve { reference, .. } => Some(reference.clone()),
            Self::Io { path, .. } => Some(path.display().to_string()),
            Self::Template(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_keep_their_kind() {
        let err: CompileError = SchemaError::missing_input("lr", "params.lr").into();
        let described = err.describe();
        assert_eq!(described["kind"], "MissingInputError");
        assert_eq!(described["path"], "params.lr");
    }

    #[test]
    fn patch_conflict_path() {
        let err = CompileError::PatchConflict {
            layer: "preset:gpu".into(),
            from: "job".into(),
            to: "service".into(),
        };
        assert_eq!(err.path().as_deref(), Some("preset:gpu.runPatch.kind"));
        assert!(err.to_string().contains("job to service"));
    }
}
