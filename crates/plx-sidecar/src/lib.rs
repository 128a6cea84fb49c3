//! Sidecar runtime for plx runs
//!
//! Runs next to the main container for its whole lifetime. It tails the main
//! container's logs into `logs/<pod>.jsonl`, snapshots the Operation spec into
//! `outputs/spec.json`, and copies changed outputs into the artifacts store.

pub mod error;
pub mod inspector;
pub mod logs;
pub mod runtime;
pub mod store;

pub use error::SidecarError;
pub use inspector::{main_container_state, ContainerState, KubeInspector, PodInspector};
pub use logs::{LogCollector, LogLine};
pub use runtime::{get_sync_interval, Sidecar, SidecarConfig, StatusReporter};
pub use store::ArtifactStore;

/// Result type alias using the sidecar's error
pub type Result<T> = std::result::Result<T, SidecarError>;
