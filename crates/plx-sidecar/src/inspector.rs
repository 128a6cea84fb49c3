//! Observing the main container from inside the pod

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, LogParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

use plx_agent::executor::operation_api_resource;
use plx_converter::operation_name;

use crate::{Result, SidecarError};

/// Waiting reasons that will never turn into a running container
const FATAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];

/// State of the main container as seen by the sidecar
#[derive(Clone, Debug, PartialEq)]
pub enum ContainerState {
    /// Not started yet (scheduling, pulling, creating)
    Pending,
    /// Running
    Running,
    /// Exited zero
    Succeeded,
    /// Exited non-zero or cannot start
    Failed {
        /// Kubelet reason
        reason: String,
        /// Exit code, absent when the container never ran
        exit_code: Option<i32>,
    },
}

impl ContainerState {
    /// Whether the main container is finished
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Read access to the pod the sidecar runs in
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodInspector: Send + Sync {
    /// Current state of the main container
    async fn container_state(&self) -> Result<ContainerState>;

    /// Timestamped log lines of the main container, optionally limited to
    /// the last `since_seconds`
    async fn logs_since(&self, since_seconds: Option<i64>) -> Result<Vec<String>>;

    /// Spec of the run's Operation resource, if it still exists
    async fn operation_spec(&self) -> Result<Option<Value>>;
}

/// State of `container` in `pod`.
///
/// A container missing from the pod spec is a [`SidecarError::Container`]:
/// the sidecar has nothing to watch.
pub fn main_container_state(pod: &Pod, container: &str) -> Result<ContainerState> {
    let declared = pod
        .spec
        .as_ref()
        .is_some_and(|spec| spec.containers.iter().any(|c| c.name == container));
    if !declared {
        return Err(SidecarError::Container(format!(
            "container `{}` is not part of the pod",
            container
        )));
    }

    let status = pod.status.as_ref();
    let container_status = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|c| c.name == container));
    let Some(state) = container_status.and_then(|c| c.state.as_ref()) else {
        return Ok(match status.and_then(|s| s.phase.as_deref()) {
            Some("Failed") => ContainerState::Failed {
                reason: status
                    .and_then(|s| s.reason.clone())
                    .unwrap_or_else(|| "PodFailed".to_string()),
                exit_code: None,
            },
            _ => ContainerState::Pending,
        });
    };

    if let Some(terminated) = &state.terminated {
        return Ok(if terminated.exit_code == 0 {
            ContainerState::Succeeded
        } else {
            ContainerState::Failed {
                reason: terminated.reason.clone().unwrap_or_else(|| "Error".to_string()),
                exit_code: Some(terminated.exit_code),
            }
        });
    }
    if state.running.is_some() {
        return Ok(ContainerState::Running);
    }
    match state.waiting.as_ref().and_then(|w| w.reason.as_deref()) {
        Some(reason) if FATAL_WAITING_REASONS.contains(&reason) => Ok(ContainerState::Failed {
            reason: reason.to_string(),
            exit_code: None,
        }),
        _ => Ok(ContainerState::Pending),
    }
}

/// Inspector backed by the in-cluster API
pub struct KubeInspector {
    pods: Api<Pod>,
    operations: Api<DynamicObject>,
    pod_name: String,
    container_id: String,
    operation: String,
}

impl KubeInspector {
    /// Inspector for `container_id` in pod `pod_name` of run `run_uuid`
    pub fn new(client: Client, namespace: &str, pod_name: &str, container_id: &str, run_uuid: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            operations: Api::namespaced_with(client, namespace, &operation_api_resource()),
            pod_name: pod_name.to_string(),
            container_id: container_id.to_string(),
            operation: operation_name(run_uuid),
        }
    }
}

#[async_trait]
impl PodInspector for KubeInspector {
    async fn container_state(&self) -> Result<ContainerState> {
        let pod = self.pods.get(&self.pod_name).await?;
        main_container_state(&pod, &self.container_id)
    }

    async fn logs_since(&self, since_seconds: Option<i64>) -> Result<Vec<String>> {
        let params = LogParams {
            container: Some(self.container_id.clone()),
            timestamps: true,
            since_seconds,
            ..Default::default()
        };
        let logs = self.pods.logs(&self.pod_name, &params).await?;
        debug!(pod = %self.pod_name, bytes = logs.len(), "fetched logs");
        Ok(logs.lines().map(str::to_string).collect())
    }

    async fn operation_spec(&self) -> Result<Option<Value>> {
        let operation = self.operations.get_opt(&self.operation).await?;
        Ok(operation.and_then(|op| op.data.get("spec").cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn pod(state: Value) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "plx-operation-abc-0"},
            "spec": {"containers": [{"name": "polyaxon-main-job"}, {"name": "polyaxon-sidecar"}]},
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "polyaxon-main-job",
                    "ready": true,
                    "restartCount": 0,
                    "image": "busybox",
                    "imageID": "",
                    "state": state,
                }],
            },
        }))
        .unwrap()
    }

    #[rstest]
    #[case::running(json!({"running": {}}), ContainerState::Running)]
    #[case::creating(json!({"waiting": {"reason": "ContainerCreating"}}), ContainerState::Pending)]
    #[case::succeeded(json!({"terminated": {"exitCode": 0}}), ContainerState::Succeeded)]
    #[case::failed(
        json!({"terminated": {"exitCode": 2, "reason": "Error"}}),
        ContainerState::Failed { reason: "Error".into(), exit_code: Some(2) }
    )]
    #[case::bad_image(
        json!({"waiting": {"reason": "ImagePullBackOff"}}),
        ContainerState::Failed { reason: "ImagePullBackOff".into(), exit_code: None }
    )]
    fn container_states(#[case] state: Value, #[case] expected: ContainerState) {
        assert_eq!(main_container_state(&pod(state), "polyaxon-main-job").unwrap(), expected);
    }

    #[test]
    fn no_status_yet_is_pending() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "p"},
            "spec": {"containers": [{"name": "polyaxon-main-job"}]},
            "status": {"phase": "Pending"},
        }))
        .unwrap();
        assert_eq!(main_container_state(&pod, "polyaxon-main-job").unwrap(), ContainerState::Pending);
    }

    #[test]
    fn unknown_container_is_fatal() {
        let err = main_container_state(&pod(json!({"running": {}})), "other").unwrap_err();
        assert!(matches!(err, SidecarError::Container(_)));
    }
}
