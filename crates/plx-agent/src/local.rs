//! Executor for docker and process plans on the agent's host
//!
//! Each submitted run becomes one task that runs the plan's steps in order.
//! Detached docker sidecars return immediately; every other step must exit
//! zero before the next one starts. Deleting a run cancels its task, which
//! kills the step in flight.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plx_converter::Converted;
use plx_schema::RunKind;

use crate::executor::Executor;
use crate::{AgentError, Result};

/// One command of a local run
#[derive(Clone, Debug, PartialEq)]
pub struct LocalCommand {
    /// Step name
    pub name: String,
    /// Executable
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub working_dir: Option<String>,
}

/// Progress of a local run
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocalStatus {
    /// A step is running
    Running {
        /// Current step
        step: String,
    },
    /// Every step exited zero
    Succeeded,
    /// A step failed to start or exited non-zero
    Failed {
        /// Failing step
        step: String,
        /// Exit code, absent when killed by a signal or never started
        code: Option<i32>,
    },
}

/// Commands of a docker or process plan, in execution order
pub fn commands(manifest: &Converted) -> Result<Vec<LocalCommand>> {
    match manifest {
        Converted::Docker(plan) => plan
            .steps
            .iter()
            .map(|step| {
                let (program, args) = step
                    .argv
                    .split_first()
                    .ok_or_else(|| AgentError::fatal(format!("docker step `{}` has no argv", step.name)))?;
                Ok(LocalCommand {
                    name: step.name.clone(),
                    program: program.clone(),
                    args: args.to_vec(),
                    env: Vec::new(),
                    working_dir: None,
                })
            })
            .collect(),
        Converted::Process(plan) => Ok(plan
            .steps
            .iter()
            .map(|step| LocalCommand {
                name: step.name.clone(),
                program: step.program.clone(),
                args: step.args.clone(),
                env: step.env.clone(),
                working_dir: step.working_dir.clone(),
            })
            .collect()),
        Converted::K8s(_) => Err(AgentError::fatal(
            "the local executor cannot run a kubernetes manifest",
        )),
    }
}

struct LocalRun {
    kind: RunKind,
    status: watch::Receiver<LocalStatus>,
    cancel: CancellationToken,
}

/// Runs docker and process plans as child processes
#[derive(Default)]
pub struct LocalExecutor {
    runs: Arc<DashMap<String, LocalRun>>,
}

impl LocalExecutor {
    /// Executor with no runs
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, run_uuid: &str) -> String {
        format!("{}/{}", namespace, run_uuid)
    }
}

async fn run_commands(commands: Vec<LocalCommand>, status: watch::Sender<LocalStatus>, cancel: CancellationToken) {
    for command in commands {
        let _ = status.send(LocalStatus::Running {
            step: command.name.clone(),
        });
        let env: BTreeMap<_, _> = command.env.iter().cloned().collect();
        let mut process = Command::new(&command.program);
        process.args(&command.args).envs(env).kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        debug!(step = %command.name, program = %command.program, "starting step");
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(step = %command.name, "run cancelled");
                return;
            }
            outcome = process.status() => outcome,
        };
        match outcome {
            Ok(exit) if exit.success() => continue,
            Ok(exit) => {
                warn!(step = %command.name, code = ?exit.code(), "step failed");
                let _ = status.send(LocalStatus::Failed {
                    step: command.name,
                    code: exit.code(),
                });
                return;
            }
            Err(e) => {
                warn!(step = %command.name, error = %e, "step could not start");
                let _ = status.send(LocalStatus::Failed {
                    step: command.name,
                    code: None,
                });
                return;
            }
        }
    }
    let _ = status.send(LocalStatus::Succeeded);
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn submit(&self, namespace: &str, run_uuid: &str, run_kind: RunKind, manifest: &Converted) -> Result<()> {
        let key = Self::key(namespace, run_uuid);
        if self.runs.contains_key(&key) {
            debug!(run_uuid = %run_uuid, "run already submitted");
            return Ok(());
        }
        let commands = commands(manifest)?;
        let first = commands.first().map(|c| c.name.clone()).unwrap_or_default();
        let (tx, rx) = watch::channel(LocalStatus::Running { step: first });
        let cancel = CancellationToken::new();
        self.runs.insert(
            key,
            LocalRun {
                kind: run_kind,
                status: rx,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(run_commands(commands, tx, cancel));
        info!(run_uuid = %run_uuid, kind = %run_kind, "started local run");
        Ok(())
    }

    async fn get(&self, namespace: &str, run_uuid: &str, _run_kind: RunKind) -> Result<Option<Value>> {
        let Some(run) = self.runs.get(&Self::key(namespace, run_uuid)) else {
            return Ok(None);
        };
        let status = run.status.borrow().clone();
        Ok(Some(json!({
            "uuid": run_uuid,
            "kind": run.kind,
            "state": status,
        })))
    }

    async fn delete(&self, namespace: &str, run_uuid: &str, _run_kind: RunKind) -> Result<()> {
        if let Some((_, run)) = self.runs.remove(&Self::key(namespace, run_uuid)) {
            run.cancel.cancel();
            info!(run_uuid = %run_uuid, "stopped local run");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plx_converter::{DockerPlan, DockerStep, ProcessPlan, ProcessStep, Stage};
    use std::time::Duration;

    fn shell(name: &str, script: &str) -> ProcessStep {
        ProcessStep {
            name: name.into(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
            env: vec![("CODE".into(), "3".into())],
        }
    }

    async fn settle(executor: &LocalExecutor, uuid: &str) -> Value {
        for _ in 0..200 {
            let value = executor.get("local", uuid, RunKind::Job).await.unwrap().unwrap();
            if value["state"]["status"] != "running" {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("run {uuid} did not finish");
    }

    #[test]
    fn docker_steps_split_argv() {
        let plan = Converted::Docker(DockerPlan {
            steps: vec![DockerStep {
                name: "polyaxon-main-job".into(),
                stage: Stage::Main,
                argv: vec!["docker".into(), "run".into(), "--rm".into(), "busybox".into()],
            }],
        });
        let commands = commands(&plan).unwrap();
        assert_eq!(commands[0].program, "docker");
        assert_eq!(commands[0].args, vec!["run", "--rm", "busybox"]);
    }

    #[tokio::test]
    async fn steps_run_in_order_until_success() {
        let executor = LocalExecutor::new();
        let plan = Converted::Process(ProcessPlan {
            steps: vec![shell("init", "exit 0"), shell("main", "exit 0")],
        });
        executor.submit("local", "ok", RunKind::Job, &plan).await.unwrap();
        let value = settle(&executor, "ok").await;
        assert_eq!(value["state"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn failing_step_stops_the_run() {
        let executor = LocalExecutor::new();
        let plan = Converted::Process(ProcessPlan {
            steps: vec![shell("init", "exit $CODE"), shell("main", "exit 0")],
        });
        executor.submit("local", "ko", RunKind::Job, &plan).await.unwrap();
        let value = settle(&executor, "ko").await;
        assert_eq!(value["state"]["status"], "failed");
        assert_eq!(value["state"]["step"], "init");
        assert_eq!(value["state"]["code"], 3);
    }

    #[tokio::test]
    async fn delete_forgets_the_run() {
        let executor = LocalExecutor::new();
        let plan = Converted::Process(ProcessPlan {
            steps: vec![shell("main", "sleep 30")],
        });
        executor.submit("local", "long", RunKind::Job, &plan).await.unwrap();
        executor.submit("local", "long", RunKind::Job, &plan).await.unwrap();
        assert!(executor.get("local", "long", RunKind::Job).await.unwrap().is_some());
        executor.delete("local", "long", RunKind::Job).await.unwrap();
        assert!(executor.get("local", "long", RunKind::Job).await.unwrap().is_none());
        executor.delete("local", "long", RunKind::Job).await.unwrap();
    }
}
