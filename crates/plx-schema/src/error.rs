//! Schema-layer errors
//!
//! The schema layer never retries; every error carries the document path it
//! refers to so the CLI can render `{kind, path, message}`.

use thiserror::Error;

/// Validation and parsing failures of the document model
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// A value does not match what the schema expects at `path`
    #[error("schema error at `{path}`: expected {expected}, got {got}")]
    Schema {
        /// Dotted path inside the document
        path: String,
        /// What the schema expects
        expected: String,
        /// What was found
        got: String,
    },

    /// Document version outside the supported range
    #[error("unsupported version {version}: supported range is [{min}, {max}]")]
    Version {
        /// Version found in the document
        version: String,
        /// Oldest supported version
        min: String,
        /// Current version
        max: String,
    },

    /// A CLI-style param or value could not be parsed
    #[error("could not parse `{key}`: {reason}")]
    Parse {
        /// Param name or raw input
        key: String,
        /// Why parsing failed
        reason: String,
    },

    /// A required input has no value
    #[error("missing required input `{name}` at `{path}`")]
    MissingInput {
        /// Input name
        name: String,
        /// Path where the value was expected
        path: String,
    },

    /// Unknown top-level document kind
    #[error("unknown document kind `{got}`, expected one of: {expected}")]
    UnknownKind {
        /// Kind found
        got: String,
        /// Accepted kinds
        expected: String,
    },
}

impl SchemaError {
    /// Create a schema mismatch error
    pub fn schema(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::Schema {
            path: path.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a parse error
    pub fn parse(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing input error
    pub fn missing_input(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::MissingInput {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Short error kind for user-facing output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "SchemaError",
            Self::Version { .. } => "VersionError",
            Self::Parse { .. } => "ParseError",
            Self::MissingInput { .. } => "MissingInputError",
            Self::UnknownKind { .. } => "UnknownKindError",
        }
    }

    /// Document path the error refers to
    pub fn path(&self) -> Option<String> {
        match self {
            Self::Schema { path, .. } | Self::MissingInput { path, .. } => Some(path.clone()),
            Self::Parse { key, .. } => Some(key.clone()),
            Self::Version { .. } => Some("version".to_string()),
            Self::UnknownKind { .. } => Some("kind".to_string()),
        }
    }
}
