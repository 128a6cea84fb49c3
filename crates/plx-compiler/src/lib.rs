//! Operation compiler for plx
//!
//! Loads operation documents, resolves component references, merges presets
//! and patches, substitutes params into the run and expands matrices into
//! trials. The output is a [`plx_schema::CompiledOperation`] ready for the
//! converter.

#![deny(missing_docs)]

pub mod compiler;
pub mod contexts;
pub mod error;
pub mod loader;
pub mod matrix;
pub mod params;
pub mod resolver;

pub use compiler::{OperationCompiler, Resolved};
pub use error::CompileError;
pub use matrix::{create_iteration, should_reschedule, MatrixExpander, Observation, SuggestionProducer, Trial};
pub use resolver::{ComponentResolver, DefaultResolver, HttpHubClient};

/// Result type alias using the compiler's error
pub type Result<T> = std::result::Result<T, CompileError>;
