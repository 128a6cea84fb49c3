//! Names shared by the converter, the agent and the sidecar
//!
//! Changing any of these changes generated manifests, so they live in one
//! place.

/// Id of the main container in every generated pod
pub const MAIN_JOB_CONTAINER: &str = "polyaxon-main-job";
/// Prefix of every generated init container
pub const INIT_PREFIX: &str = "polyaxon-init";
/// Name of the sidecar container
pub const SIDECAR_CONTAINER: &str = "polyaxon-sidecar";
/// Prefix used for containers generated without a user-supplied name
pub const GENERATED_CONTAINER_PREFIX: &str = "plx-container";

/// Volume name prefix for connection-backed volumes
pub const CONNECTION_VOLUME_PREFIX: &str = "plx-connection-";
/// Volume holding the run's artifacts context
pub const CONTEXT_VOLUME_ARTIFACTS: &str = "plx-context-artifacts";
/// Volume holding the auth context
pub const CONTEXT_VOLUME_AUTH: &str = "plx-auth-context";
/// Volume holding init outputs shared with the main container
pub const CONTEXT_VOLUME_INIT: &str = "plx-init-context";
/// Memory-backed volume mounted at `/dev/shm`
pub const SHM_VOLUME: &str = "plx-dshm";
/// Volume exposing the docker socket
pub const DOCKER_VOLUME: &str = "plx-docker";

/// Root of the context mounts inside every container
pub const CONTEXT_MOUNT_ROOT: &str = "/plx-context";
/// Mount path of the artifacts context
pub const CONTEXT_MOUNT_ARTIFACTS: &str = "/plx-context/artifacts";
/// Mount path of the auth context
pub const CONTEXT_MOUNT_AUTH: &str = "/plx-context/.auth";
/// File written by `initializer auth`
pub const CONTEXT_AUTH_FILE: &str = "/plx-context/.auth/.auth";
/// Mount path of the shared init volume
pub const CONTEXT_MOUNT_INIT: &str = "/plx-context/init";
/// Shared memory mount
pub const SHM_MOUNT: &str = "/dev/shm";
/// Docker socket path
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Sub-directory of a run holding user outputs
pub const RUN_OUTPUTS_DIR: &str = "outputs";
/// Sub-directory of a run holding log streams
pub const RUN_LOGS_DIR: &str = "logs";
/// Snapshot of the operator resource written by the sidecar
pub const RUN_SPEC_FILE: &str = "spec.json";

/// Custom resource group/version of generated operations
pub const OPERATION_API_VERSION: &str = "core.polyaxon.com/v1";
/// Custom resource group
pub const OPERATION_GROUP: &str = "core.polyaxon.com";
/// Custom resource version
pub const OPERATION_VERSION: &str = "v1";
/// Custom resource kind
pub const OPERATION_KIND: &str = "Operation";
/// Custom resource plural
pub const OPERATION_PLURAL: &str = "operations";
/// Prefix of generated resource names
pub const OPERATION_NAME_PREFIX: &str = "plx-operation";

/// Label carrying the run uuid
pub const LABEL_RUN_UUID: &str = "operation.polyaxon.com/uuid";
/// Label carrying the run name
pub const LABEL_RUN_NAME: &str = "operation.polyaxon.com/name";
/// Label carrying the run kind
pub const LABEL_RUN_KIND: &str = "operation.polyaxon.com/kind";
/// Label carrying the owner name
pub const LABEL_OWNER: &str = "operation.polyaxon.com/owner";
/// Label carrying the project name
pub const LABEL_PROJECT: &str = "operation.polyaxon.com/project";
/// Label marking resources managed by plx
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of the managed-by label
pub const MANAGED_BY: &str = "polyaxon";

/// Config root override
pub const ENV_HOME: &str = "POLYAXON_HOME";
/// Control-plane host
pub const ENV_PLATFORM_HOST: &str = "POLYAXON_PLATFORM_HOST";
/// Agent instance, `<org>.agents.<name>`
pub const ENV_AGENT_INSTANCE: &str = "POLYAXON_AGENT_INSTANCE";
/// Path of the agent config file
pub const ENV_AGENT_CONFIG: &str = "POLYAXON_AGENT_CONFIG";
/// Artifacts store connection name
pub const ENV_ARTIFACTS_STORE_NAME: &str = "POLYAXON_ARTIFACTS_STORE_NAME";
/// API token
pub const ENV_AUTH_TOKEN: &str = "POLYAXON_AUTH_TOKEN";
/// API username
pub const ENV_AUTH_USERNAME: &str = "POLYAXON_AUTH_USERNAME";
/// Seconds between compatibility checks
pub const ENV_INTERVALS_COMPATIBILITY_CHECK: &str = "POLYAXON_INTERVALS_COMPATIBILITY_CHECK";
/// Run instance, `<owner>.<project>.runs.<uuid>`
pub const ENV_RUN_INSTANCE: &str = "POLYAXON_RUN_INSTANCE";
/// Run uuid injected in the main container
pub const ENV_RUN_UUID: &str = "POLYAXON_RUN_UUID";
/// Run kind injected in auxiliary containers
pub const ENV_RUN_KIND: &str = "POLYAXON_RUN_KIND";
/// Artifacts root injected in the main container
pub const ENV_RUN_ARTIFACTS_PATH: &str = "POLYAXON_RUN_ARTIFACTS_PATH";
/// Outputs path injected in the main container
pub const ENV_RUN_OUTPUTS_PATH: &str = "POLYAXON_RUN_OUTPUTS_PATH";
/// Container id watched by the sidecar
pub const ENV_CONTAINER_ID: &str = "POLYAXON_CONTAINER_ID";
/// Service mode of the current process
pub const ENV_SERVICE_MODE: &str = "POLYAXON_SERVICE_MODE";
/// Namespace used by the agent and sidecar
pub const ENV_K8S_NAMESPACE: &str = "POLYAXON_K8S_NAMESPACE";
/// Log level for the main container and the CLI
pub const ENV_LOG_LEVEL: &str = "POLYAXON_LOG_LEVEL";
/// Pod name (downward API)
pub const ENV_POD_NAME: &str = "POLYAXON_K8S_POD_ID";
/// Marks container processes launched by plx
pub const ENV_IS_MANAGED: &str = "POLYAXON_IS_MANAGED";

/// Header carrying the CLI version
pub const HEADER_CLI_VERSION: &str = "X-POLYAXON-CLI-VERSION";
/// Header carrying the client version
pub const HEADER_CLIENT_VERSION: &str = "X-POLYAXON-CLIENT-VERSION";
/// Header marking in-cluster requests
pub const HEADER_INTERNAL: &str = "X-POLYAXON-INTERNAL";
/// Header carrying the service mode
pub const HEADER_SERVICE: &str = "X-POLYAXON-SERVICE";

/// Default config directory name under the user's home
pub const DEFAULT_HOME_DIR: &str = ".polyaxon";
/// Client config file name under the config root
pub const CLIENT_CONFIG_FILE: &str = ".client";
/// CLI config file name under the config root
pub const CLI_CONFIG_FILE: &str = ".cli";
