//! Common building blocks for plx: errors, retry, templating and configuration
//!
//! Every other crate in the workspace depends on this one. Nothing in here
//! knows about operations or backends; it only provides the ambient pieces
//! (error plumbing, backoff, the sandboxed template engine, the explicit
//! `Context` that replaces process-wide settings) and the naming constants
//! shared between the converter, the agent and the sidecar.

#![deny(missing_docs)]

pub mod config;
pub mod constants;
pub mod error;
pub mod retry;
pub mod template;

pub use config::Context;
pub use error::Error;

/// Result type alias using the common Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Version string reported in `X-POLYAXON-CLIENT-VERSION` and `check --version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
