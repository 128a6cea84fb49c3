//! `docker run` plans for jobs and services
//!
//! Built from the assembled pod: init containers run first, then the main
//! container, then user sidecars (detached). Anything without a docker analog
//! (claims, secret volumes, env from object references) is dropped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use plx_schema::k8s::{Container, PodTemplateSpec, Volume};

use crate::error::ConverterError;
use crate::Result;

/// Position of a container in the plan
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Runs to completion before main
    Init,
    /// The user workload
    Main,
    /// Detached next to main
    Sidecar,
}

/// One `docker run` invocation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerStep {
    /// Container name in the pod
    pub name: String,
    /// Stage
    pub stage: Stage,
    /// Full argument vector starting with `docker`
    pub argv: Vec<String>,
}

/// Ordered docker invocations of a run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerPlan {
    /// Steps in execution order
    pub steps: Vec<DockerStep>,
}

fn volume_flag(volume: &Volume, uuid: &str, mount_path: &str, read_only: bool) -> Option<Vec<String>> {
    let suffix = if read_only { ":ro" } else { "" };
    if let Some(host) = &volume.host_path {
        return Some(vec!["-v".into(), format!("{}:{}{}", host.path, mount_path, suffix)]);
    }
    if let Some(empty_dir) = &volume.empty_dir {
        if empty_dir.medium.as_deref() == Some("Memory") {
            return Some(vec!["--tmpfs".into(), mount_path.to_string()]);
        }
        return Some(vec![
            "-v".into(),
            format!("plx-{}-{}:{}{}", uuid, volume.name, mount_path, suffix),
        ]);
    }
    None
}

fn quantity_flags(container: &Container) -> Vec<String> {
    let mut flags = Vec::new();
    let Some(resources) = &container.resources else {
        return flags;
    };
    for (key, quantity) in &resources.limits {
        let Some(value) = quantity.as_f64() else { continue };
        match key.as_str() {
            "cpu" => flags.push(format!("--cpus={}", value)),
            "memory" => flags.push(format!("--memory={}", value.round() as u64)),
            key if key.contains("gpu") && value > 0.0 => {
                flags.push(format!("--gpus={}", value.round() as u64))
            }
            _ => {}
        }
    }
    flags
}

fn run_argv(
    container: &Container,
    pod: &PodTemplateSpec,
    uuid: &str,
    stage: Stage,
    ports: &[u16],
) -> Result<Vec<String>> {
    let name = container.name.clone().unwrap_or_default();
    let image = container.image.clone().ok_or_else(|| {
        ConverterError::converter(format!("containers.{}.image", name), "docker needs an image")
    })?;
    let mut argv = vec!["docker".to_string(), "run".to_string()];
    match stage {
        Stage::Sidecar => argv.push("-d".into()),
        _ => argv.push("--rm".into()),
    }
    argv.push(format!("--name={}-{}", uuid, name));
    for (key, value) in &pod.metadata.labels {
        argv.push(format!("--label={}={}", key, value));
    }
    for var in &container.env {
        match &var.value {
            Some(value) => argv.push(format!("--env={}={}", var.name, value)),
            None => debug!(env = %var.name, "dropping env var without a literal value"),
        }
    }
    for mount in &container.volume_mounts {
        let volume = pod.spec.volumes.iter().find(|v| v.name == mount.name);
        match volume.and_then(|v| volume_flag(v, uuid, &mount.mount_path, mount.read_only.unwrap_or(false))) {
            Some(flags) => argv.extend(flags),
            None => debug!(volume = %mount.name, "dropping volume without a docker analog"),
        }
    }
    if stage == Stage::Main {
        for port in ports {
            argv.push(format!("--publish={}:{}", port, port));
        }
    }
    argv.extend(quantity_flags(container));
    if let Some(dir) = &container.working_dir {
        argv.push(format!("--workdir={}", dir));
    }
    let mut rest = Vec::new();
    if let Some((entrypoint, command_args)) = container.command.split_first() {
        argv.push(format!("--entrypoint={}", entrypoint));
        rest.extend(command_args.iter().cloned());
    }
    argv.push(image);
    argv.extend(rest);
    argv.extend(container.args.iter().cloned());
    Ok(argv)
}

/// Plan for a pod; the first container is the main one
pub fn docker_plan(pod: &PodTemplateSpec, uuid: &str, ports: &[u16]) -> Result<DockerPlan> {
    let mut steps = Vec::new();
    for container in &pod.spec.init_containers {
        steps.push(step(container, pod, uuid, Stage::Init, ports)?);
    }
    for (index, container) in pod.spec.containers.iter().enumerate() {
        let stage = if index == 0 { Stage::Main } else { Stage::Sidecar };
        steps.push(step(container, pod, uuid, stage, ports)?);
    }
    Ok(DockerPlan { steps })
}

fn step(container: &Container, pod: &PodTemplateSpec, uuid: &str, stage: Stage, ports: &[u16]) -> Result<DockerStep> {
    Ok(DockerStep {
        name: container.name.clone().unwrap_or_default(),
        stage,
        argv: run_argv(container, pod, uuid, stage, ports)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(value: serde_json::Value) -> PodTemplateSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn main_container_argv() {
        let pod = pod(json!({
            "spec": {
                "containers": [{
                    "name": "polyaxon-main-job",
                    "image": "busybox",
                    "command": ["echo", "hi"],
                    "env": [{"name": "A", "value": "1"}, {"name": "S", "valueFrom": {"secretKeyRef": {"name": "s", "key": "k"}}}],
                    "volumeMounts": [{"name": "data", "mountPath": "/data", "readOnly": true}, {"name": "claim", "mountPath": "/c"}],
                    "resources": {"limits": {"cpu": "500m", "memory": "1Gi"}},
                }],
                "volumes": [
                    {"name": "data", "hostPath": {"path": "/mnt/data"}},
                    {"name": "claim", "persistentVolumeClaim": {"claimName": "c"}},
                ],
            }
        }));
        let plan = docker_plan(&pod, "abc", &[]).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(
            plan.steps[0].argv,
            vec![
                "docker",
                "run",
                "--rm",
                "--name=abc-polyaxon-main-job",
                "--env=A=1",
                "-v",
                "/mnt/data:/data:ro",
                "--cpus=0.5",
                "--memory=1073741824",
                "--entrypoint=echo",
                "busybox",
                "hi",
            ]
        );
    }

    #[test]
    fn init_runs_before_main_and_sidecars_detach() {
        let pod = pod(json!({
            "spec": {
                "initContainers": [{"name": "polyaxon-init-git", "image": "init", "command": ["polyaxon", "initializer", "git"]}],
                "containers": [
                    {"name": "polyaxon-main-job", "image": "web", "ports": [{"containerPort": 8000}]},
                    {"name": "proxy", "image": "envoy"},
                ],
            }
        }));
        let plan = docker_plan(&pod, "abc", &[8000]).unwrap();
        let stages: Vec<_> = plan.steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![Stage::Init, Stage::Main, Stage::Sidecar]);
        assert!(plan.steps[1].argv.contains(&"--publish=8000:8000".to_string()));
        assert_eq!(plan.steps[2].argv[2], "-d");
    }

    #[test]
    fn missing_image_fails() {
        let pod = pod(json!({"spec": {"containers": [{"name": "polyaxon-main-job"}]}}));
        assert!(docker_plan(&pod, "abc", &[]).is_err());
    }
}
