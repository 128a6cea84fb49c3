//! Document model for plx: operations, components, runs and compiled operations
//!
//! Every union is a tagged enum discriminated by `kind`. Fields accept both
//! camelCase and snake_case on input and serialize as camelCase. Template
//! expressions (`{{ ... }}`) are accepted wherever a field is a [`RefOr`].

#![warn(missing_docs)]

pub mod compiled;
pub mod component;
pub mod connections;
pub mod environment;
pub mod error;
pub mod image;
pub mod init;
pub mod io;
pub mod k8s;
pub mod matrix;
pub mod operation;
pub mod policies;
pub mod refs;
pub mod run;
pub mod schedule;
pub mod spec;
pub mod statuses;
pub mod types;
pub mod version;

pub use compiled::{CompiledOperation, Globals, ReplicaContext};
pub use component::Component;
pub use connections::{Connection, ConnectionKind, ConnectionSchema};
pub use error::SchemaError;
pub use io::{IoSpec, Param, ParamSpec};
pub use matrix::{HpParam, Matrix, MatrixParams};
pub use operation::{ComponentReference, Operation, PatchStrategy};
pub use refs::RefOr;
pub use run::{Replica, Run, RunKind};
pub use spec::{get_kind, read, read_str, SpecKind, Specification};
pub use statuses::{Status, StatusCondition, TriggerPolicy};
pub use types::IoType;

/// Result type alias using the schema error
pub type Result<T> = std::result::Result<T, SchemaError>;
