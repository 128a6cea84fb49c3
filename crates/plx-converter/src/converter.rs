//! Backend dispatch: compiled operation → Kubernetes resource, docker plan or
//! process plan

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::info;

use plx_common::constants::{OPERATION_API_VERSION, OPERATION_KIND, OPERATION_NAME_PREFIX};
use plx_schema::k8s::ObjectMeta;
use plx_schema::refs::RefOr;
use plx_schema::run::{ReplicaRef, RayReplica, SchedulingPolicy};
use plx_schema::{CompiledOperation, Run, RunKind};

use crate::config::ConverterConfig;
use crate::docker::{docker_plan, DockerPlan};
use crate::error::ConverterError;
use crate::operation::{
    BatchJobSpec, KubeflowJobSpec, OperationResource, OperationSpec, RayGroupSpec, RayJobSpec,
    ReplicaTemplate, SchedulingPolicySpec, ServiceSpec, TerminationSpec, Workload,
};
use crate::pod::PodAssembler;
use crate::process::{process_plan, ProcessPlan};
use crate::Result;

/// Where a run is executed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Operation custom resource
    K8s,
    /// `docker run` invocations
    Docker,
    /// Local processes
    Process,
}

impl Backend {
    /// Backend name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::K8s => "k8s",
            Self::Docker => "docker",
            Self::Process => "process",
        }
    }

    /// Whether the backend has a converter for the run kind
    pub fn supports(&self, kind: RunKind) -> bool {
        match self {
            Self::K8s => true,
            Self::Docker | Self::Process => matches!(kind, RunKind::Job | RunKind::Service),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConverterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "k8s" | "kubernetes" => Ok(Self::K8s),
            "docker" => Ok(Self::Docker),
            "process" => Ok(Self::Process),
            other => Err(ConverterError::converter(
                "backend",
                format!("unknown backend `{}`, expected one of k8s, docker, process", other),
            )),
        }
    }
}

/// Output of a conversion
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Converted {
    /// Operation custom resource
    K8s(Box<OperationResource>),
    /// Docker invocations
    Docker(DockerPlan),
    /// Process invocations
    Process(ProcessPlan),
}

impl Converted {
    /// YAML rendering, the canonical wire format
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// JSON rendering
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Name of the Operation resource of a run
pub fn operation_name(uuid: &str) -> String {
    format!("{}-{}", OPERATION_NAME_PREFIX, uuid)
}

fn resolve_opt<T: Copy>(value: &Option<RefOr<T>>, path: &str) -> Result<Option<T>> {
    Ok(value.as_ref().map(|v| v.resolved(path)).transpose()?.copied())
}

fn scheduling_policy(policy: &Option<SchedulingPolicy>) -> Result<Option<SchedulingPolicySpec>> {
    let Some(policy) = policy else {
        return Ok(None);
    };
    Ok(Some(SchedulingPolicySpec {
        min_available: resolve_opt(&policy.min_available, "run.schedulingPolicy.minAvailable")?,
        queue: policy.queue.clone(),
        priority_class: policy.priority_class.clone(),
        schedule_timeout_seconds: policy.schedule_timeout_seconds,
    }))
}

/// Converts one compiled operation for a backend
pub struct Converter<'a> {
    compiled: &'a CompiledOperation,
    config: &'a ConverterConfig,
}

impl<'a> Converter<'a> {
    /// Converter over a compiled operation and the agent's inputs
    pub fn new(compiled: &'a CompiledOperation, config: &'a ConverterConfig) -> Self {
        Self { compiled, config }
    }

    /// Convert for a backend; fails without producing anything on error
    pub fn convert(&self, backend: Backend) -> Result<Converted> {
        let kind = self.compiled.run_kind();
        if !backend.supports(kind) {
            return Err(ConverterError::UnsupportedRunKind {
                backend: backend.to_string(),
                kind: kind.to_string(),
            });
        }
        let converted = match backend {
            Backend::K8s => Converted::K8s(Box::new(self.to_operation()?)),
            Backend::Docker => {
                let (assembler, pod) = self.single_pod()?;
                Converted::Docker(docker_plan(&pod, assembler.uuid(), &self.service_ports()?)?)
            }
            Backend::Process => {
                let (_, pod) = self.single_pod()?;
                Converted::Process(process_plan(&pod)?)
            }
        };
        info!(backend = %backend, kind = %kind, "converted operation");
        Ok(converted)
    }

    fn single_pod(&self) -> Result<(PodAssembler<'a>, plx_schema::k8s::PodTemplateSpec)> {
        let assembler = PodAssembler::new(self.compiled, self.config)?.with_sidecar(false);
        let replicas = self.compiled.run.replicas();
        let main = replicas
            .first()
            .ok_or_else(|| ConverterError::converter("run", "the run has no replica"))?;
        let pod = assembler.assemble(&main.role, main.pod)?;
        Ok((assembler, pod))
    }

    fn service_ports(&self) -> Result<Vec<u16>> {
        match &self.compiled.run {
            Run::Service(service) => service
                .ports
                .iter()
                .enumerate()
                .map(|(i, port)| -> Result<u16> { Ok(*port.resolved(&format!("run.ports[{}]", i))?) })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    fn termination(&self) -> Result<Option<TerminationSpec>> {
        let Some(termination) = &self.compiled.termination else {
            return Ok(None);
        };
        Ok(Some(TerminationSpec {
            backoff_limit: resolve_opt(&termination.max_retries, "termination.maxRetries")?,
            active_deadline_seconds: resolve_opt(&termination.timeout, "termination.timeout")?,
            ttl_seconds_after_finished: resolve_opt(&termination.ttl, "termination.ttl")?,
        }))
    }

    fn replica_templates(
        &self,
        assembler: &PodAssembler<'_>,
        replicas: Vec<ReplicaRef<'_>>,
    ) -> Result<BTreeMap<String, ReplicaTemplate>> {
        let mut specs = BTreeMap::new();
        for replica in replicas {
            let count = replica
                .replicas
                .map(|r| r.resolved(&format!("run.{}.replicas", replica.role)).copied())
                .transpose()?
                .unwrap_or(1);
            specs.insert(
                replica.role.clone(),
                ReplicaTemplate {
                    replicas: count,
                    template: assembler.assemble(&replica.role, replica.pod)?,
                },
            );
        }
        Ok(specs)
    }

    fn ray_group(&self, assembler: &PodAssembler<'_>, role: &str, group: &RayReplica) -> Result<RayGroupSpec> {
        let path = format!("run.{}", role.replace('/', "."));
        Ok(RayGroupSpec {
            replicas: resolve_opt(&group.replicas, &format!("{}.replicas", path))?.unwrap_or(1),
            min_replicas: resolve_opt(&group.min_replicas, &format!("{}.minReplicas", path))?,
            max_replicas: resolve_opt(&group.max_replicas, &format!("{}.maxReplicas", path))?,
            ray_start_params: group.ray_start_params.clone(),
            template: assembler.assemble(role, &group.pod)?,
        })
    }

    fn workload(&self, assembler: &PodAssembler<'_>) -> Result<Workload> {
        let run = &self.compiled.run;
        let kubeflow = |base: KubeflowJobSpec| -> Result<KubeflowJobSpec> {
            Ok(KubeflowJobSpec {
                replica_specs: self.replica_templates(assembler, run.replicas())?,
                ..base
            })
        };
        let workload = match run {
            Run::Job(job) => Workload::BatchJob(BatchJobSpec {
                template: assembler.assemble(plx_schema::run::MAIN_ROLE, &job.pod)?,
            }),
            Run::Notifier(aux) | Run::Cleaner(aux) | Run::Tuner(aux) => Workload::BatchJob(BatchJobSpec {
                template: assembler.assemble(plx_schema::run::MAIN_ROLE, &aux.pod)?,
            }),
            Run::Service(service) => Workload::Service(ServiceSpec {
                replicas: resolve_opt(&service.replicas, "run.replicas")?.unwrap_or(1),
                ports: self.service_ports()?,
                rewrite_path: service.rewrite_path,
                is_external: service.is_external,
                template: assembler.assemble(plx_schema::run::MAIN_ROLE, &service.pod)?,
            }),
            Run::MpiJob(mpi) => Workload::MpiJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: mpi.clean_pod_policy,
                scheduling_policy: scheduling_policy(&mpi.scheduling_policy)?,
                slots_per_worker: resolve_opt(&mpi.slots_per_worker, "run.slotsPerWorker")?,
                ..Default::default()
            })?),
            Run::TfJob(tf) => Workload::TfJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: tf.clean_pod_policy,
                scheduling_policy: scheduling_policy(&tf.scheduling_policy)?,
                enable_dynamic_worker: tf.enable_dynamic_worker,
                success_policy: tf.success_policy.clone(),
                ..Default::default()
            })?),
            Run::PytorchJob(pt) => Workload::PytorchJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: pt.clean_pod_policy,
                scheduling_policy: scheduling_policy(&pt.scheduling_policy)?,
                elastic_policy: pt.elastic_policy.clone(),
                ..Default::default()
            })?),
            Run::PaddleJob(mw) => Workload::PaddleJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: mw.clean_pod_policy,
                scheduling_policy: scheduling_policy(&mw.scheduling_policy)?,
                ..Default::default()
            })?),
            Run::XgbJob(mw) => Workload::XgbJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: mw.clean_pod_policy,
                scheduling_policy: scheduling_policy(&mw.scheduling_policy)?,
                ..Default::default()
            })?),
            Run::MxJob(mx) => Workload::MxJob(kubeflow(KubeflowJobSpec {
                clean_pod_policy: mx.clean_pod_policy,
                scheduling_policy: scheduling_policy(&mx.scheduling_policy)?,
                mode: mx.mode,
                ..Default::default()
            })?),
            Run::DaskJob(_) => Workload::DaskJob(kubeflow(KubeflowJobSpec::default())?),
            Run::RayJob(ray) => {
                let head = ray
                    .head
                    .as_ref()
                    .map(|head| self.ray_group(assembler, "head", head))
                    .transpose()?;
                let mut workers = BTreeMap::new();
                for (name, group) in &ray.workers {
                    workers.insert(
                        name.clone(),
                        self.ray_group(assembler, &format!("workers/{}", name), group)?,
                    );
                }
                Workload::RayJob(RayJobSpec {
                    entrypoint: ray.entrypoint.clone(),
                    runtime_env: ray.runtime_env.clone(),
                    metadata: ray.metadata.clone(),
                    ray_version: ray.ray_version.clone(),
                    head,
                    workers,
                })
            }
        };
        Ok(workload)
    }

    /// The Operation custom resource of the run
    pub fn to_operation(&self) -> Result<OperationResource> {
        let assembler = PodAssembler::new(self.compiled, self.config)?;
        let plugins = self.compiled.plugins();
        let spec = OperationSpec {
            workload: self.workload(&assembler)?,
            termination: self.termination()?,
            collect_logs: plugins.collect_logs_enabled(),
            sync_statuses: plugins.sync_statuses.unwrap_or(true),
        };
        Ok(OperationResource {
            api_version: OPERATION_API_VERSION.to_string(),
            kind: OPERATION_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(operation_name(assembler.uuid())),
                namespace: Some(self.config.namespace.clone()),
                labels: assembler.labels(),
                annotations: BTreeMap::new(),
            },
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMeta;
    use rstest::rstest;
    use serde_json::json;

    fn compiled(run: serde_json::Value) -> CompiledOperation {
        CompiledOperation::from_run(serde_json::from_value(run).unwrap())
    }

    fn config() -> ConverterConfig {
        ConverterConfig::new(
            "plx",
            RunMeta {
                uuid: "8d2f".into(),
                ..Default::default()
            },
        )
    }

    #[rstest]
    #[case::docker_job(Backend::Docker, RunKind::Job, true)]
    #[case::docker_tfjob(Backend::Docker, RunKind::TfJob, false)]
    #[case::process_service(Backend::Process, RunKind::Service, true)]
    #[case::process_ray(Backend::Process, RunKind::RayJob, false)]
    #[case::k8s_tuner(Backend::K8s, RunKind::Tuner, true)]
    fn dispatch_table(#[case] backend: Backend, #[case] kind: RunKind, #[case] supported: bool) {
        assert_eq!(backend.supports(kind), supported);
    }

    #[test]
    fn backend_names() {
        assert_eq!("kubernetes".parse::<Backend>().unwrap(), Backend::K8s);
        assert_eq!("docker".parse::<Backend>().unwrap(), Backend::Docker);
        assert!("slurm".parse::<Backend>().is_err());
    }

    #[test]
    fn unsupported_kind_produces_nothing() {
        let op = compiled(json!({"kind": "tfjob", "worker": {"replicas": 2, "container": {"image": "tf"}}}));
        let config = config();
        let err = Converter::new(&op, &config).convert(Backend::Docker).unwrap_err();
        match err {
            ConverterError::UnsupportedRunKind { backend, kind } => {
                assert_eq!(backend, "docker");
                assert_eq!(kind, "tfjob");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn service_resolves_ports_and_replicas() {
        let op = compiled(json!({
            "kind": "service",
            "ports": [8000],
            "replicas": 2,
            "container": {"image": "web"},
        }));
        let config = config();
        let resource = Converter::new(&op, &config).to_operation().unwrap();
        match &resource.spec.workload {
            Workload::Service(service) => {
                assert_eq!(service.replicas, 2);
                assert_eq!(service.ports, vec![8000]);
                assert_eq!(service.template.spec.restart_policy, None);
            }
            other => panic!("unexpected workload: {other:?}"),
        }
        assert_eq!(resource.metadata.name.as_deref(), Some("plx-operation-8d2f"));
    }

    #[test]
    fn unresolved_replicas_are_missing_inputs() {
        let op = compiled(json!({
            "kind": "pytorchjob",
            "master": {"replicas": 1, "container": {"image": "pt"}},
            "worker": {"replicas": "{{ workers }}", "container": {"image": "pt"}},
        }));
        let config = config();
        let err = Converter::new(&op, &config).to_operation().unwrap_err();
        assert!(matches!(
            err,
            ConverterError::Schema(plx_schema::SchemaError::MissingInput { ref path, .. }) if path == "run.worker.replicas"
        ));
    }

    #[test]
    fn ray_workers_sorted_by_name() {
        let op = compiled(json!({
            "kind": "rayjob",
            "entrypoint": "python main.py",
            "head": {"container": {"image": "ray"}},
            "workers": {
                "small": {"replicas": 2, "container": {"image": "ray"}},
                "large": {"replicas": 1, "minReplicas": 1, "maxReplicas": 4, "container": {"image": "ray"}},
            },
        }));
        let config = config();
        let converted = Converter::new(&op, &config).convert(Backend::K8s).unwrap();
        let value = converted.to_json().unwrap();
        let workers: Vec<_> = value["spec"]["rayJob"]["workers"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(workers, vec!["large", "small"]);
        assert_eq!(value["spec"]["rayJob"]["workers"]["large"]["maxReplicas"], 4);
    }

    #[test]
    fn termination_is_resolved() {
        let mut op = compiled(json!({"kind": "job", "container": {"image": "x"}}));
        op.termination = Some(serde_json::from_value(json!({"maxRetries": 3, "timeout": 600})).unwrap());
        let config = config();
        let resource = Converter::new(&op, &config).to_operation().unwrap();
        let termination = resource.spec.termination.unwrap();
        assert_eq!(termination.backoff_limit, Some(3));
        assert_eq!(termination.active_deadline_seconds, Some(600));
        assert_eq!(termination.ttl_seconds_after_finished, None);
    }

    #[test]
    fn process_backend_runs_the_main_command() {
        let op = compiled(json!({"kind": "job", "container": {"image": "x", "command": ["python", "train.py"]}}));
        let config = config();
        match Converter::new(&op, &config).convert(Backend::Process).unwrap() {
            Converted::Process(plan) => {
                assert_eq!(plan.steps.len(), 1);
                assert_eq!(plan.steps[0].program, "python");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
