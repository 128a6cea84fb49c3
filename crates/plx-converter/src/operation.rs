//! `core.polyaxon.com/v1` Operation resources
//!
//! Typed representation of the custom resource the operator reconciles. The
//! spec carries exactly one workload section keyed by its kind (`batchJob`,
//! `service`, `mpiJob`, ...), each embedding one pod template per replica.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use plx_schema::k8s::{ObjectMeta, PodTemplateSpec};
use plx_schema::run::{CleanPodPolicy, ElasticPolicy, MxJobMode};

/// Operation custom resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: OperationSpec,
}

/// Operation spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    #[serde(flatten)]
    pub workload: Workload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationSpec>,

    #[serde(default)]
    pub collect_logs: bool,

    #[serde(default)]
    pub sync_statuses: bool,
}

/// Termination limits, resolved
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u64>,
}

/// One workload per operation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Workload {
    BatchJob(BatchJobSpec),
    Service(ServiceSpec),
    MpiJob(KubeflowJobSpec),
    TfJob(KubeflowJobSpec),
    PytorchJob(KubeflowJobSpec),
    PaddleJob(KubeflowJobSpec),
    MxJob(KubeflowJobSpec),
    XgbJob(KubeflowJobSpec),
    RayJob(RayJobSpec),
    DaskJob(KubeflowJobSpec),
}

impl Workload {
    /// Pod templates in serialization order
    pub fn templates(&self) -> Vec<&PodTemplateSpec> {
        match self {
            Self::BatchJob(job) => vec![&job.template],
            Self::Service(service) => vec![&service.template],
            Self::RayJob(ray) => ray
                .head
                .iter()
                .chain(ray.workers.values())
                .map(|group| &group.template)
                .collect(),
            Self::MpiJob(spec)
            | Self::TfJob(spec)
            | Self::PytorchJob(spec)
            | Self::PaddleJob(spec)
            | Self::MxJob(spec)
            | Self::XgbJob(spec)
            | Self::DaskJob(spec) => spec.replica_specs.values().map(|r| &r.template).collect(),
        }
    }
}

/// Single-pod batch job
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchJobSpec {
    pub template: PodTemplateSpec,
}

/// Long-running service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub replicas: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_path: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_external: Option<bool>,

    pub template: PodTemplateSpec,
}

/// Pod count and template of one role
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReplicaTemplate {
    pub replicas: u32,
    pub template: PodTemplateSpec,
}

/// Gang scheduling, resolved
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_timeout_seconds: Option<u32>,
}

/// Training-operator job (MPI, TF, PyTorch, Paddle, MXNet, XGBoost, Dask)
///
/// Roles are keyed by name; `BTreeMap` keeps the output order stable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeflowJobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots_per_worker: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_dynamic_worker: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_policy: Option<ElasticPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MxJobMode>,

    pub replica_specs: BTreeMap<String, ReplicaTemplate>,
}

/// Ray head or worker group
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayGroupSpec {
    pub replicas: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ray_start_params: BTreeMap<String, String>,

    pub template: PodTemplateSpec,
}

/// Ray job; worker groups sorted by name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayJobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_env: Option<Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ray_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<RayGroupSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workers: BTreeMap<String, RayGroupSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> PodTemplateSpec {
        serde_json::from_value(json!({"spec": {"containers": [{"name": "polyaxon-main-job", "image": "x"}]}}))
            .unwrap()
    }

    #[test]
    fn workload_is_keyed_by_kind() {
        let spec = OperationSpec {
            workload: Workload::BatchJob(BatchJobSpec { template: template() }),
            termination: None,
            collect_logs: true,
            sync_statuses: true,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value["batchJob"]["template"]["spec"]["containers"].is_array());
        assert_eq!(value["collectLogs"], true);
        let back: OperationSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn kubeflow_roles_serialize_sorted() {
        let mut job = KubeflowJobSpec::default();
        for role in ["worker", "launcher"] {
            job.replica_specs.insert(
                role.to_string(),
                ReplicaTemplate {
                    replicas: 1,
                    template: template(),
                },
            );
        }
        let text = serde_json::to_string(&Workload::MpiJob(job)).unwrap();
        let launcher = text.find("launcher").unwrap();
        let worker = text.find("worker").unwrap();
        assert!(launcher < worker);
        assert!(text.starts_with(r#"{"mpiJob":{"replicaSpecs""#));
    }
}
