//! Cluster agent for plx
//!
//! Executors apply, inspect and delete the objects produced by the converter.
//! The [`Agent`] pulls work from the control plane, drives each run through
//! the [`Reconciler`], and reports status conditions back. [`wait`] blocks
//! until a run's backend object is gone.

pub mod agent;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod executor;
pub mod local;
pub mod reconcile;
pub mod wait;

pub use agent::Agent;
pub use config::AgentConfig;
pub use control_plane::{AgentState, ControlPlane, HttpControlPlane, RunRequest};
pub use error::AgentError;
pub use executor::{Executor, KubeExecutor};
pub use local::LocalExecutor;
pub use reconcile::{reconcile, Observation, Reconciler, RunState};
pub use wait::wait;

/// Result type alias using the agent's error
pub type Result<T> = std::result::Result<T, AgentError>;
