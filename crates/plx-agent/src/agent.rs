//! The agent loop
//!
//! Every `sleep_interval` the agent pulls its state from the control plane,
//! converts and submits queued runs, and deletes the backend objects of runs
//! being stopped or deleted. It then fetches the backend object of every
//! submitted run and feeds what it sees to the [`Reconciler`], so every
//! transition is reported exactly once. A run that moves to `retrying` is
//! deleted and submitted again from the manifest kept at first submission.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use plx_common::error::Retryable;
use plx_common::retry::{retry_with_backoff, RetryConfig};
use plx_converter::{Backend, Converted, Converter, RunMeta};
use plx_schema::{CompiledOperation, RunKind, Status};

use crate::config::AgentConfig;
use crate::control_plane::{ControlPlane, RunRequest};
use crate::executor::Executor;
use crate::reconcile::{Observation, Reconciler, RunState};
use crate::{AgentError, Result};

/// Cluster agent
pub struct Agent {
    config: AgentConfig,
    backend: Backend,
    executor: Arc<dyn Executor>,
    control_plane: Arc<dyn ControlPlane>,
    reconciler: Reconciler,
    manifests: DashMap<String, Arc<Converted>>,
    retry: RetryConfig,
}

impl Agent {
    /// Agent over an executor and a control plane
    pub fn new(config: AgentConfig, executor: Arc<dyn Executor>, control_plane: Arc<dyn ControlPlane>) -> Result<Self> {
        let backend = config.backend()?;
        let retry = config.retry_config();
        Ok(Self {
            reconciler: Reconciler::new(Arc::clone(&control_plane), retry.clone()),
            config,
            backend,
            executor,
            control_plane,
            manifests: DashMap::new(),
            retry,
        })
    }

    /// Reconciler holding the tracked runs
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Poll until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(namespace = %self.config.namespace, backend = %self.backend, "agent started");
        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "agent iteration failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("agent stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.sleep_interval()) => {}
            }
        }
    }

    /// One pass over the agent state
    pub async fn tick(&self) -> Result<()> {
        let plane = self.control_plane.as_ref();
        let state = retry_with_backoff(&self.retry, "get_agent_state", move || plane.get_agent_state()).await?;
        for run in &state.queued {
            if let Err(e) = self.start(run).await {
                warn!(run_uuid = %run.uuid, error = %e, "could not start run");
            }
        }
        for run in &state.stopping {
            if let Err(e) = self.stop(run).await {
                warn!(run_uuid = %run.uuid, error = %e, "could not stop run");
            }
        }
        for run in &state.deleting {
            if let Err(e) = self.delete(run).await {
                warn!(run_uuid = %run.uuid, error = %e, "could not delete run");
            }
        }
        for run in self.reconciler.tracked() {
            if !Self::is_submitted(run.status) {
                continue;
            }
            if let Err(e) = self.poll(&run.uuid).await {
                warn!(run_uuid = %run.uuid, error = %e, "could not observe run");
            }
        }
        let pruned = self.reconciler.prune();
        self.manifests.retain(|uuid, _| self.reconciler.is_tracked(uuid));
        if pruned > 0 {
            info!(pruned, "stopped tracking finished runs");
        }
        Ok(())
    }

    fn is_submitted(status: Status) -> bool {
        !status.is_terminal() && !status.is_pending() && status != Status::Stopping
    }

    /// Fetch the backend object of a tracked run and reconcile what it shows
    pub async fn poll(&self, run_uuid: &str) -> Result<Status> {
        let state = self
            .reconciler
            .state(run_uuid)
            .await
            .ok_or_else(|| AgentError::Agent(format!("run `{}` is not tracked", run_uuid)))?;
        if !Self::is_submitted(state.status) {
            return Ok(state.status);
        }
        let executor = self.executor.as_ref();
        let namespace = self.config.namespace.as_str();
        let kind = state.kind;
        let object = retry_with_backoff(&self.retry, "get", move || executor.get(namespace, run_uuid, kind)).await?;
        let Some(observation) = Observation::from_backend(object.as_ref()) else {
            return Ok(state.status);
        };
        let status = self.reconciler.observe(run_uuid, observation).await?;
        if status == Status::Retrying {
            return self.resubmit(run_uuid, kind).await;
        }
        Ok(status)
    }

    async fn resubmit(&self, run_uuid: &str, kind: RunKind) -> Result<Status> {
        let Some(manifest) = self.manifests.get(run_uuid).map(|entry| Arc::clone(entry.value())) else {
            return self
                .reconciler
                .observe(
                    run_uuid,
                    Observation::BackendFatal {
                        reason: "no manifest kept for the retry".to_string(),
                    },
                )
                .await;
        };
        let executor = self.executor.as_ref();
        let namespace = self.config.namespace.as_str();
        retry_with_backoff(&self.retry, "delete", move || executor.delete(namespace, run_uuid, kind)).await?;
        let manifest = manifest.as_ref();
        retry_with_backoff(&self.retry, "submit", move || {
            executor.submit(namespace, run_uuid, kind, manifest)
        })
        .await?;
        info!(run_uuid = %run_uuid, "run resubmitted");
        self.reconciler.observe(run_uuid, Observation::Submitted).await
    }

    fn track(&self, run: &RunRequest, max_retries: u32) {
        self.reconciler.track(
            RunState::queued(run.owner.clone(), run.project.clone(), run.uuid.clone(), run.kind)
                .with_max_retries(max_retries),
        );
    }

    /// Convert and submit a queued run
    pub async fn start(&self, run: &RunRequest) -> Result<Status> {
        if self.reconciler.is_tracked(&run.uuid) {
            if let Some(state) = self.reconciler.state(&run.uuid).await {
                if state.status != Status::Queued {
                    return Ok(state.status);
                }
            }
        }
        let compiled = match &run.content {
            Some(content) => serde_json::from_value::<CompiledOperation>(content.clone()),
            None => {
                self.track(run, 0);
                return self
                    .reconciler
                    .observe(
                        &run.uuid,
                        Observation::BackendFatal {
                            reason: "the run has no compiled content".to_string(),
                        },
                    )
                    .await;
            }
        };
        let compiled = match compiled {
            Ok(compiled) => compiled,
            Err(e) => {
                self.track(run, 0);
                return self
                    .reconciler
                    .observe(&run.uuid, Observation::BackendFatal { reason: e.to_string() })
                    .await;
            }
        };
        let max_retries = compiled.termination.as_ref().map(|t| t.retries()).unwrap_or(0);
        self.track(run, max_retries);

        let converter_config = self.config.converter_config(RunMeta {
            uuid: run.uuid.clone(),
            name: run.name.clone(),
            owner: Some(run.owner.clone()),
            project: Some(run.project.clone()),
        });
        let manifest = match Converter::new(&compiled, &converter_config).convert(self.backend) {
            Ok(manifest) => manifest,
            Err(e) => {
                let err = AgentError::from(e);
                return self
                    .reconciler
                    .observe(&run.uuid, Observation::BackendFatal { reason: err.to_string() })
                    .await;
            }
        };

        let executor = self.executor.as_ref();
        let namespace = self.config.namespace.as_str();
        let manifest = Arc::new(manifest);
        let (uuid, kind, converted) = (run.uuid.as_str(), run.kind, manifest.as_ref());
        let submitted = retry_with_backoff(&self.retry, "submit", move || {
            executor.submit(namespace, uuid, kind, converted)
        })
        .await;
        match submitted {
            Ok(()) => {
                self.manifests.insert(uuid.to_string(), Arc::clone(&manifest));
                self.reconciler.observe(uuid, Observation::Submitted).await
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                self.reconciler
                    .observe(uuid, Observation::BackendFatal { reason: e.to_string() })
                    .await
            }
        }
    }

    /// Stop a run and remove its backend object
    pub async fn stop(&self, run: &RunRequest) -> Result<Status> {
        self.track(run, 0);
        self.reconciler.observe(&run.uuid, Observation::StopRequested).await?;
        self.delete(run).await?;
        self.reconciler.observe(&run.uuid, Observation::Gone).await
    }

    /// Remove a run's backend object
    pub async fn delete(&self, run: &RunRequest) -> Result<()> {
        let executor = self.executor.as_ref();
        let namespace = self.config.namespace.as_str();
        let (uuid, kind) = (run.uuid.as_str(), run.kind);
        retry_with_backoff(&self.retry, "delete", move || executor.delete(namespace, uuid, kind)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::{AgentState, MockControlPlane};
    use crate::executor::MockExecutor;
    use plx_converter::Converted;
    use plx_schema::RunKind;
    use serde_json::json;

    fn request(uuid: &str, content: Option<serde_json::Value>) -> RunRequest {
        RunRequest {
            owner: "acme".into(),
            project: "mnist".into(),
            uuid: uuid.into(),
            name: None,
            kind: RunKind::Job,
            content,
        }
    }

    fn job() -> serde_json::Value {
        json!({
            "run": {"kind": "job", "container": {"image": "busybox", "command": ["echo", "hi"]}},
            "termination": {"maxRetries": 2},
        })
    }

    fn config() -> AgentConfig {
        AgentConfig {
            namespace: "plx".into(),
            max_retries: 2,
            max_backoff: 0,
            ..Default::default()
        }
    }

    fn recording_plane() -> MockControlPlane {
        let mut plane = MockControlPlane::new();
        plane.expect_create_run_status().returning(|_, _, _, _| Ok(()));
        plane
    }

    #[tokio::test]
    async fn queued_run_is_converted_and_submitted() {
        let mut executor = MockExecutor::new();
        executor
            .expect_submit()
            .withf(|namespace, uuid, kind, manifest| {
                namespace == "plx" && uuid == "abc" && *kind == RunKind::Job && matches!(manifest, Converted::K8s(_))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();

        let status = agent.start(&request("abc", Some(job()))).await.unwrap();
        assert_eq!(status, Status::Scheduled);
        let state = agent.reconciler().state("abc").await.unwrap();
        assert_eq!(state.max_retries, 2);

        // a second pull of the same queued run is a no-op
        assert_eq!(agent.start(&request("abc", Some(job()))).await.unwrap(), Status::Scheduled);
    }

    #[tokio::test]
    async fn fatal_submission_fails_the_run() {
        let mut executor = MockExecutor::new();
        executor
            .expect_submit()
            .times(1)
            .returning(|_, _, _, _| Err(AgentError::fatal("forbidden")));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();

        let status = agent.start(&request("abc", Some(job()))).await.unwrap();
        assert_eq!(status, Status::Failed);
        let state = agent.reconciler().state("abc").await.unwrap();
        let reason = state.last_condition().unwrap().message.clone().unwrap();
        assert!(reason.contains("forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submission_is_retried() {
        let mut executor = MockExecutor::new();
        let mut calls = 0;
        executor.expect_submit().times(2).returning(move |_, _, _, _| {
            calls += 1;
            if calls == 1 {
                Err(AgentError::transient("conflict"))
            } else {
                Ok(())
            }
        });
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();
        assert_eq!(agent.start(&request("abc", Some(job()))).await.unwrap(), Status::Scheduled);
    }

    #[tokio::test]
    async fn unconvertible_run_fails_without_submission() {
        let executor = MockExecutor::new();
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();
        let content = json!({"run": {"kind": "job", "connections": ["missing"], "container": {"image": "x"}}});
        let status = agent.start(&request("abc", Some(content))).await.unwrap();
        assert_eq!(status, Status::Failed);
    }

    #[tokio::test]
    async fn stop_deletes_and_marks_stopped() {
        let mut executor = MockExecutor::new();
        executor.expect_submit().returning(|_, _, _, _| Ok(()));
        executor.expect_delete().times(1).returning(|_, _, _| Ok(()));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();

        agent.start(&request("abc", Some(job()))).await.unwrap();
        let status = agent.stop(&request("abc", None)).await.unwrap();
        assert_eq!(status, Status::Stopped);
    }

    #[tokio::test]
    async fn tick_processes_the_agent_state() {
        let mut plane = recording_plane();
        plane.expect_get_agent_state().times(1).returning(|| {
            Ok(AgentState {
                queued: vec![request("abc", Some(job()))],
                ..Default::default()
            })
        });
        let mut executor = MockExecutor::new();
        executor.expect_submit().times(1).returning(|_, _, _, _| Ok(()));
        executor
            .expect_get()
            .times(1)
            .returning(|_, _, _| Ok(Some(json!({"kind": "Operation"}))));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(plane)).unwrap();

        agent.tick().await.unwrap();
        assert_eq!(agent.reconciler().state("abc").await.unwrap().status, Status::Scheduled);
    }

    fn failed_operation() -> serde_json::Value {
        json!({
            "kind": "Operation",
            "status": {"conditions": [
                {"type": "running", "status": "True"},
                {"type": "failed", "status": "True", "reason": "Error", "message": "exit code 2"},
            ]},
        })
    }

    #[tokio::test]
    async fn backend_failures_retry_until_the_budget_is_spent() {
        let reported = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut plane = MockControlPlane::new();
        let sink = Arc::clone(&reported);
        plane.expect_create_run_status().returning(move |_, _, _, condition| {
            sink.lock().unwrap().push(condition.type_);
            Ok(())
        });
        let mut pulls = 0;
        plane.expect_get_agent_state().returning(move || {
            pulls += 1;
            Ok(AgentState {
                queued: if pulls == 1 { vec![request("abc", Some(job()))] } else { vec![] },
                ..Default::default()
            })
        });
        let mut executor = MockExecutor::new();
        executor.expect_submit().times(3).returning(|_, _, _, _| Ok(()));
        executor.expect_delete().times(2).returning(|_, _, _| Ok(()));
        executor
            .expect_get()
            .withf(|namespace, uuid, kind| namespace == "plx" && uuid == "abc" && *kind == RunKind::Job)
            .times(3)
            .returning(|_, _, _| Ok(Some(failed_operation())));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(plane)).unwrap();

        for _ in 0..5 {
            agent.tick().await.unwrap();
        }
        assert_eq!(
            *reported.lock().unwrap(),
            vec![
                Status::Scheduled,
                Status::Retrying,
                Status::Scheduled,
                Status::Retrying,
                Status::Scheduled,
                Status::Failed,
            ]
        );
        assert!(!agent.reconciler().is_tracked("abc"));
    }

    async fn polled(object: Option<serde_json::Value>) -> Status {
        let mut executor = MockExecutor::new();
        executor.expect_submit().returning(|_, _, _, _| Ok(()));
        executor.expect_get().times(1).returning(move |_, _, _| Ok(object.clone()));
        let agent = Agent::new(config(), Arc::new(executor), Arc::new(recording_plane())).unwrap();
        agent.start(&request("abc", Some(job()))).await.unwrap();
        agent.poll("abc").await.unwrap()
    }

    #[tokio::test]
    async fn poll_follows_the_backend() {
        let condition = |type_: &str| json!({"status": {"conditions": [{"type": type_, "status": "True"}]}});
        assert_eq!(polled(Some(condition("starting"))).await, Status::Starting);
        assert_eq!(polled(Some(condition("running"))).await, Status::Running);
        assert_eq!(polled(Some(json!({"kind": "Operation"}))).await, Status::Scheduled);
    }

    #[tokio::test]
    async fn vanished_operation_fails_the_run() {
        assert_eq!(polled(None).await, Status::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_when_cancelled() {
        let mut plane = recording_plane();
        plane.expect_get_agent_state().returning(|| Ok(AgentState::default()));
        let agent = Agent::new(config(), Arc::new(MockExecutor::new()), Arc::new(plane)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        agent.run(cancel).await;
    }
}
