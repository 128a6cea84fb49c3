//! Backend conversion for plx
//!
//! Turns a [`plx_schema::CompiledOperation`] into something a backend can run:
//! an Operation custom resource for Kubernetes, a list of `docker run`
//! invocations, or a list of local processes. Pod assembly (init containers,
//! sidecar, volumes, env, scheduling) is shared between backends.

pub mod accelerators;
pub mod config;
pub mod converter;
pub mod docker;
pub mod error;
pub mod init;
pub mod operation;
pub mod pod;
pub mod process;
pub mod sidecar;
pub mod volumes;

pub use config::{Auxiliaries, ContainerTemplate, ConverterConfig, RunMeta, SchedulingDefaults};
pub use converter::{operation_name, Backend, Converted, Converter};
pub use docker::{docker_plan, DockerPlan, DockerStep, Stage};
pub use error::ConverterError;
pub use init::init_artifact_context_args;
pub use operation::{OperationResource, OperationSpec, Workload};
pub use pod::PodAssembler;
pub use process::{process_plan, ProcessPlan, ProcessStep};
pub use volumes::volume_name;

/// Result type alias using the converter's error
pub type Result<T> = std::result::Result<T, ConverterError>;
