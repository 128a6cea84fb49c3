//! Run variants, discriminated by `kind`
//!
//! Single-pod kinds (job, service, notifier, cleaner, tuner) carry one
//! [`Replica`]. Distributed kinds carry fixed named slots of
//! [`ReplicaSpec`], except Ray whose `workers` is a map keyed by name.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::Environment;
use crate::init::Init;
use crate::k8s::{lenient_string_map, Container, Volume};
use crate::refs::RefOr;
use crate::SchemaError;

/// Kind of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Batch job
    Job,
    /// Long-running service
    Service,
    /// MPI job
    MpiJob,
    /// TensorFlow job
    TfJob,
    /// PyTorch job
    PytorchJob,
    /// Paddle job
    PaddleJob,
    /// MXNet job
    MxJob,
    /// XGBoost job
    XgbJob,
    /// Ray job
    RayJob,
    /// Dask job
    DaskJob,
    /// Notification sender
    Notifier,
    /// Artifacts cleaner
    Cleaner,
    /// Matrix tuner
    Tuner,
}

impl RunKind {
    /// All kinds, in declaration order
    pub const ALL: &'static [RunKind] = &[
        Self::Job,
        Self::Service,
        Self::MpiJob,
        Self::TfJob,
        Self::PytorchJob,
        Self::PaddleJob,
        Self::MxJob,
        Self::XgbJob,
        Self::RayJob,
        Self::DaskJob,
        Self::Notifier,
        Self::Cleaner,
        Self::Tuner,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Service => "service",
            Self::MpiJob => "mpijob",
            Self::TfJob => "tfjob",
            Self::PytorchJob => "pytorchjob",
            Self::PaddleJob => "paddlejob",
            Self::MxJob => "mxjob",
            Self::XgbJob => "xgbjob",
            Self::RayJob => "rayjob",
            Self::DaskJob => "daskjob",
            Self::Notifier => "notifier",
            Self::Cleaner => "cleaner",
            Self::Tuner => "tuner",
        }
    }

    /// Kinds made of several replica roles
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            Self::MpiJob
                | Self::TfJob
                | Self::PytorchJob
                | Self::PaddleJob
                | Self::MxJob
                | Self::XgbJob
                | Self::RayJob
                | Self::DaskJob
        )
    }

    /// Kinds generated by the platform rather than users
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, Self::Notifier | Self::Cleaner | Self::Tuner)
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| SchemaError::schema("run.kind", expected_run_kinds(), s.to_string()))
    }
}

/// `one of [...]` listing every run kind
pub fn expected_run_kinds() -> String {
    format!(
        "one of [{}]",
        RunKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    )
}

/// Containers, volumes and scheduling of one pod role
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    /// Pod environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Connection names requested by the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<String>,
    /// Extra volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// User init items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<Init>,
    /// User sidecars
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Container>,
    /// Main container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

/// A replica role of a distributed run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    /// Number of pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<RefOr<u32>>,
    /// Pod definition
    #[serde(flatten)]
    pub pod: Replica,
}

/// A Ray head or worker group
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayReplica {
    /// Number of pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<RefOr<u32>>,
    /// Autoscaler lower bound
    #[serde(default, alias = "min_replicas", skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<RefOr<u32>>,
    /// Autoscaler upper bound
    #[serde(default, alias = "max_replicas", skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<RefOr<u32>>,
    /// `ray start` parameters
    #[serde(
        default,
        alias = "ray_start_params",
        deserialize_with = "lenient_string_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub ray_start_params: BTreeMap<String, String>,
    /// Pod definition
    #[serde(flatten)]
    pub pod: Replica,
}

/// Pod cleanup policy of training operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanPodPolicy {
    /// Delete every pod
    #[serde(alias = "all")]
    All,
    /// Delete running pods
    #[serde(alias = "running")]
    Running,
    /// Keep every pod
    #[serde(alias = "none")]
    None,
}

/// Gang-scheduling policy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingPolicy {
    /// Minimum pods scheduled together
    #[serde(default, alias = "min_available", skip_serializing_if = "Option::is_none")]
    pub min_available: Option<RefOr<u32>>,
    /// Scheduler queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Priority class
    #[serde(default, alias = "priority_class", skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
    /// Scheduling timeout
    #[serde(default, alias = "schedule_timeout_seconds", skip_serializing_if = "Option::is_none")]
    pub schedule_timeout_seconds: Option<u32>,
}

/// Batch job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    /// Pod definition
    #[serde(flatten)]
    pub pod: Replica,
}

/// Long-running service
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRun {
    /// Exposed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<RefOr<u16>>,
    /// Strip the service prefix from proxied paths
    #[serde(default, alias = "rewrite_path", skip_serializing_if = "Option::is_none")]
    pub rewrite_path: Option<bool>,
    /// Expose outside the cluster
    #[serde(default, alias = "is_external", skip_serializing_if = "Option::is_none")]
    pub is_external: Option<bool>,
    /// Number of pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<RefOr<u32>>,
    /// Pod definition
    #[serde(flatten)]
    pub pod: Replica,
}

/// MPI job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MpiJobRun {
    /// Pod cleanup policy
    #[serde(default, alias = "clean_pod_policy", skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,
    /// Gang scheduling
    #[serde(default, alias = "scheduling_policy", skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    /// MPI slots per worker
    #[serde(default, alias = "slots_per_worker", skip_serializing_if = "Option::is_none")]
    pub slots_per_worker: Option<RefOr<u32>>,
    /// Launcher role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
}

/// TensorFlow job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TfJobRun {
    /// Pod cleanup policy
    #[serde(default, alias = "clean_pod_policy", skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,
    /// Gang scheduling
    #[serde(default, alias = "scheduling_policy", skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    /// Allow workers to join dynamically
    #[serde(default, alias = "enable_dynamic_worker", skip_serializing_if = "Option::is_none")]
    pub enable_dynamic_worker: Option<bool>,
    /// Success policy
    #[serde(default, alias = "success_policy", skip_serializing_if = "Option::is_none")]
    pub success_policy: Option<String>,
    /// Chief role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chief: Option<ReplicaSpec>,
    /// Parameter server role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
    /// Evaluator role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<ReplicaSpec>,
}

/// Elastic training policy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticPolicy {
    /// Lower bound of workers
    #[serde(default, alias = "min_replicas", skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    /// Upper bound of workers
    #[serde(default, alias = "max_replicas", skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
    /// Rendezvous backend
    #[serde(default, alias = "rdzv_backend", skip_serializing_if = "Option::is_none")]
    pub rdzv_backend: Option<String>,
    /// Rendezvous port
    #[serde(default, alias = "rdzv_port", skip_serializing_if = "Option::is_none")]
    pub rdzv_port: Option<u16>,
    /// Rendezvous host
    #[serde(default, alias = "rdzv_host", skip_serializing_if = "Option::is_none")]
    pub rdzv_host: Option<String>,
    /// Rendezvous id
    #[serde(default, alias = "rdzv_id", skip_serializing_if = "Option::is_none")]
    pub rdzv_id: Option<String>,
    /// Processes per node
    #[serde(default, alias = "n_proc_per_node", skip_serializing_if = "Option::is_none")]
    pub n_proc_per_node: Option<u32>,
    /// Restarts before failing
    #[serde(default, alias = "max_restarts", skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Single-node rendezvous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone: Option<bool>,
}

/// PyTorch job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PytorchJobRun {
    /// Pod cleanup policy
    #[serde(default, alias = "clean_pod_policy", skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,
    /// Gang scheduling
    #[serde(default, alias = "scheduling_policy", skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    /// Elastic policy
    #[serde(default, alias = "elastic_policy", skip_serializing_if = "Option::is_none")]
    pub elastic_policy: Option<ElasticPolicy>,
    /// Master role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
}

/// Master/worker job shared by Paddle and XGBoost
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MasterWorkerRun {
    /// Pod cleanup policy
    #[serde(default, alias = "clean_pod_policy", skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,
    /// Gang scheduling
    #[serde(default, alias = "scheduling_policy", skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    /// Master role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
}

/// MXNet job mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MxJobMode {
    /// Distributed training
    MXTrain,
    /// Auto tuning
    MXTune,
}

/// MXNet job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MxJobRun {
    /// Pod cleanup policy
    #[serde(default, alias = "clean_pod_policy", skip_serializing_if = "Option::is_none")]
    pub clean_pod_policy: Option<CleanPodPolicy>,
    /// Gang scheduling
    #[serde(default, alias = "scheduling_policy", skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    /// Train or tune
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MxJobMode>,
    /// Scheduler role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ReplicaSpec>,
    /// Server role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
    /// Tuner role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuner: Option<ReplicaSpec>,
    /// Tuner tracker role
    #[serde(default, alias = "tuner_tracker", skip_serializing_if = "Option::is_none")]
    pub tuner_tracker: Option<ReplicaSpec>,
    /// Tuner server role
    #[serde(default, alias = "tuner_server", skip_serializing_if = "Option::is_none")]
    pub tuner_server: Option<ReplicaSpec>,
}

/// Ray job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayJobRun {
    /// Driver entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Ray runtime env
    #[serde(default, alias = "runtime_env", skip_serializing_if = "Option::is_none")]
    pub runtime_env: Option<Value>,
    /// Job metadata
    #[serde(default, deserialize_with = "lenient_string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Ray version
    #[serde(default, alias = "ray_version", skip_serializing_if = "Option::is_none")]
    pub ray_version: Option<String>,
    /// Head group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<RayReplica>,
    /// Worker groups by name, ordered lexicographically
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workers: BTreeMap<String, RayReplica>,
}

/// Dask job
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaskJobRun {
    /// Client job role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<ReplicaSpec>,
    /// Worker role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ReplicaSpec>,
    /// Scheduler role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ReplicaSpec>,
}

/// Notifier, cleaner and tuner runs
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuxiliaryRun {
    /// Pod definition; the container falls back to the auxiliary template
    #[serde(flatten)]
    pub pod: Replica,
}

/// Run section of a component, discriminated by `kind`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Run {
    /// Batch job
    Job(JobRun),
    /// Service
    Service(ServiceRun),
    /// MPI job
    MpiJob(MpiJobRun),
    /// TensorFlow job
    TfJob(TfJobRun),
    /// PyTorch job
    PytorchJob(PytorchJobRun),
    /// Paddle job
    PaddleJob(MasterWorkerRun),
    /// MXNet job
    MxJob(MxJobRun),
    /// XGBoost job
    XgbJob(MasterWorkerRun),
    /// Ray job
    RayJob(RayJobRun),
    /// Dask job
    DaskJob(DaskJobRun),
    /// Notifier
    Notifier(AuxiliaryRun),
    /// Cleaner
    Cleaner(AuxiliaryRun),
    /// Tuner
    Tuner(AuxiliaryRun),
}

/// Borrowed view of one replica role
#[derive(Clone, Debug)]
pub struct ReplicaRef<'a> {
    /// Role name (`main`, `worker`, `workers/<name>` for Ray groups)
    pub role: String,
    /// Declared pod count
    pub replicas: Option<&'a RefOr<u32>>,
    /// Pod definition
    pub pod: &'a Replica,
}

/// Role name of single-pod runs
pub const MAIN_ROLE: &str = "main";

fn push_slot<'a>(out: &mut Vec<ReplicaRef<'a>>, role: &str, slot: &'a Option<ReplicaSpec>) {
    if let Some(spec) = slot {
        out.push(ReplicaRef {
            role: role.to_string(),
            replicas: spec.replicas.as_ref(),
            pod: &spec.pod,
        });
    }
}

fn push_slot_mut<'a>(out: &mut Vec<&'a mut Replica>, slot: &'a mut Option<ReplicaSpec>) {
    if let Some(spec) = slot {
        out.push(&mut spec.pod);
    }
}

impl Run {
    /// Kind of this run
    pub fn kind(&self) -> RunKind {
        match self {
            Self::Job(_) => RunKind::Job,
            Self::Service(_) => RunKind::Service,
            Self::MpiJob(_) => RunKind::MpiJob,
            Self::TfJob(_) => RunKind::TfJob,
            Self::PytorchJob(_) => RunKind::PytorchJob,
            Self::PaddleJob(_) => RunKind::PaddleJob,
            Self::MxJob(_) => RunKind::MxJob,
            Self::XgbJob(_) => RunKind::XgbJob,
            Self::RayJob(_) => RunKind::RayJob,
            Self::DaskJob(_) => RunKind::DaskJob,
            Self::Notifier(_) => RunKind::Notifier,
            Self::Cleaner(_) => RunKind::Cleaner,
            Self::Tuner(_) => RunKind::Tuner,
        }
    }

    /// Replica roles in a fixed order; Ray worker groups sorted by name
    pub fn replicas(&self) -> Vec<ReplicaRef<'_>> {
        let mut out = Vec::new();
        match self {
            Self::Job(job) => out.push(ReplicaRef {
                role: MAIN_ROLE.to_string(),
                replicas: None,
                pod: &job.pod,
            }),
            Self::Service(service) => out.push(ReplicaRef {
                role: MAIN_ROLE.to_string(),
                replicas: service.replicas.as_ref(),
                pod: &service.pod,
            }),
            Self::Notifier(aux) | Self::Cleaner(aux) | Self::Tuner(aux) => out.push(ReplicaRef {
                role: MAIN_ROLE.to_string(),
                replicas: None,
                pod: &aux.pod,
            }),
            Self::MpiJob(mpi) => {
                push_slot(&mut out, "launcher", &mpi.launcher);
                push_slot(&mut out, "worker", &mpi.worker);
            }
            Self::TfJob(tf) => {
                push_slot(&mut out, "chief", &tf.chief);
                push_slot(&mut out, "ps", &tf.ps);
                push_slot(&mut out, "worker", &tf.worker);
                push_slot(&mut out, "evaluator", &tf.evaluator);
            }
            Self::PytorchJob(pt) => {
                push_slot(&mut out, "master", &pt.master);
                push_slot(&mut out, "worker", &pt.worker);
            }
            Self::PaddleJob(mw) | Self::XgbJob(mw) => {
                push_slot(&mut out, "master", &mw.master);
                push_slot(&mut out, "worker", &mw.worker);
            }
            Self::MxJob(mx) => {
                push_slot(&mut out, "scheduler", &mx.scheduler);
                push_slot(&mut out, "server", &mx.server);
                push_slot(&mut out, "worker", &mx.worker);
                push_slot(&mut out, "tuner", &mx.tuner);
                push_slot(&mut out, "tunerTracker", &mx.tuner_tracker);
                push_slot(&mut out, "tunerServer", &mx.tuner_server);
            }
            Self::RayJob(ray) => {
                if let Some(head) = &ray.head {
                    out.push(ReplicaRef {
                        role: "head".to_string(),
                        replicas: head.replicas.as_ref(),
                        pod: &head.pod,
                    });
                }
                for (name, group) in &ray.workers {
                    out.push(ReplicaRef {
                        role: format!("workers/{}", name),
                        replicas: group.replicas.as_ref(),
                        pod: &group.pod,
                    });
                }
            }
            Self::DaskJob(dask) => {
                push_slot(&mut out, "job", &dask.job);
                push_slot(&mut out, "scheduler", &dask.scheduler);
                push_slot(&mut out, "worker", &dask.worker);
            }
        }
        out
    }

    /// Mutable pod definitions, in the same order as [`Run::replicas`]
    pub fn pods_mut(&mut self) -> Vec<&mut Replica> {
        let mut out = Vec::new();
        match self {
            Self::Job(job) => out.push(&mut job.pod),
            Self::Service(service) => out.push(&mut service.pod),
            Self::Notifier(aux) | Self::Cleaner(aux) | Self::Tuner(aux) => out.push(&mut aux.pod),
            Self::MpiJob(mpi) => {
                push_slot_mut(&mut out, &mut mpi.launcher);
                push_slot_mut(&mut out, &mut mpi.worker);
            }
            Self::TfJob(tf) => {
                push_slot_mut(&mut out, &mut tf.chief);
                push_slot_mut(&mut out, &mut tf.ps);
                push_slot_mut(&mut out, &mut tf.worker);
                push_slot_mut(&mut out, &mut tf.evaluator);
            }
            Self::PytorchJob(pt) => {
                push_slot_mut(&mut out, &mut pt.master);
                push_slot_mut(&mut out, &mut pt.worker);
            }
            Self::PaddleJob(mw) | Self::XgbJob(mw) => {
                push_slot_mut(&mut out, &mut mw.master);
                push_slot_mut(&mut out, &mut mw.worker);
            }
            Self::MxJob(mx) => {
                push_slot_mut(&mut out, &mut mx.scheduler);
                push_slot_mut(&mut out, &mut mx.server);
                push_slot_mut(&mut out, &mut mx.worker);
                push_slot_mut(&mut out, &mut mx.tuner);
                push_slot_mut(&mut out, &mut mx.tuner_tracker);
                push_slot_mut(&mut out, &mut mx.tuner_server);
            }
            Self::RayJob(ray) => {
                if let Some(head) = &mut ray.head {
                    out.push(&mut head.pod);
                }
                for group in ray.workers.values_mut() {
                    out.push(&mut group.pod);
                }
            }
            Self::DaskJob(dask) => {
                push_slot_mut(&mut out, &mut dask.job);
                push_slot_mut(&mut out, &mut dask.scheduler);
                push_slot_mut(&mut out, &mut dask.worker);
            }
        }
        out
    }

    /// Every connection name referenced by containers and init items
    pub fn connection_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for replica in self.replicas() {
            for name in replica
                .pod
                .connections
                .iter()
                .chain(replica.pod.init.iter().filter_map(|i| i.connection.as_ref()))
            {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}
