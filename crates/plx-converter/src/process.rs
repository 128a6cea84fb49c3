//! Local process plans for jobs and services

use serde::{Deserialize, Serialize};
use tracing::debug;

use plx_schema::k8s::{Container, PodTemplateSpec};

use crate::error::ConverterError;
use crate::Result;

/// One command invocation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    /// Container the step comes from
    pub name: String,
    /// Executable
    pub program: String,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Literal environment, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

/// Ordered invocations: init steps, then the main command
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessPlan {
    /// Steps in execution order
    pub steps: Vec<ProcessStep>,
}

fn process_step(container: &Container) -> Option<ProcessStep> {
    let mut argv = container.command.iter().chain(container.args.iter()).cloned();
    let program = argv.next()?;
    Some(ProcessStep {
        name: container.name.clone().unwrap_or_default(),
        program,
        args: argv.collect(),
        working_dir: container.working_dir.clone(),
        env: container
            .env
            .iter()
            .filter_map(|var| var.value.clone().map(|value| (var.name.clone(), value)))
            .collect(),
    })
}

/// Plan for a pod; init containers without a command and sidecars are dropped
pub fn process_plan(pod: &PodTemplateSpec) -> Result<ProcessPlan> {
    let mut steps = Vec::new();
    for container in &pod.spec.init_containers {
        match process_step(container) {
            Some(step) => steps.push(step),
            None => debug!(container = ?container.name, "skipping init container without a command"),
        }
    }
    let main = pod
        .spec
        .containers
        .first()
        .and_then(process_step)
        .ok_or_else(|| ConverterError::converter("run.container.command", "the process backend needs a command"))?;
    steps.push(main);
    Ok(ProcessPlan { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_and_args_form_the_invocation() {
        let pod: PodTemplateSpec = serde_json::from_value(json!({
            "spec": {
                "initContainers": [
                    {"name": "polyaxon-init-git", "command": ["polyaxon", "initializer", "git", "--url=u"]},
                    {"name": "user-init", "image": "alpine"},
                ],
                "containers": [{
                    "name": "polyaxon-main-job",
                    "command": ["python", "train.py"],
                    "args": ["--lr=0.1"],
                    "workingDir": "/code",
                    "env": [{"name": "A", "value": "1"}],
                }],
            }
        }))
        .unwrap();
        let plan = process_plan(&pod).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].program, "polyaxon");
        let main = &plan.steps[1];
        assert_eq!(main.program, "python");
        assert_eq!(main.args, vec!["train.py", "--lr=0.1"]);
        assert_eq!(main.working_dir.as_deref(), Some("/code"));
        assert_eq!(main.env, vec![("A".to_string(), "1".to_string())]);
    }

    #[test]
    fn main_without_command_fails() {
        let pod: PodTemplateSpec =
            serde_json::from_value(json!({"spec": {"containers": [{"name": "polyaxon-main-job", "image": "x"}]}}))
                .unwrap();
        let err = process_plan(&pod).unwrap_err();
        assert!(matches!(err, ConverterError::Converter { ref path, .. } if path == "run.container.command"));
    }
}
