//! Init containers: canonical argument lists and container construction
//!
//! Every generated init container runs the `polyaxon` binary shipped in the
//! init image (or a plain shell for the artifacts context). Arguments use the
//! `--flag=value` form so that the manifests are stable across retries.

use std::collections::BTreeMap;

use serde_json::json;

use plx_common::constants::{INIT_PREFIX, RUN_OUTPUTS_DIR};
use plx_schema::connections::GitSchema;
use plx_schema::init::{DockerfileInit, FileInit, GitInit, TensorboardInit};
use plx_schema::k8s::{Container, ResourceRequirements};

use crate::config::ContainerTemplate;
use crate::error::ConverterError;
use crate::Result;

/// Resources of generated init containers unless the template overrides them
pub fn default_init_resources() -> ResourceRequirements {
    ResourceRequirements::new(
        &[("cpu", "0.1"), ("memory", "60Mi")],
        &[("cpu", "1"), ("memory", "500Mi")],
    )
}

/// Shell commands preparing `<run_path>` and `<run_path>/outputs`
///
/// With `clean`, existing non-empty directories are emptied first.
pub fn init_artifact_context_args(run_path: &str, clean: bool) -> Vec<String> {
    let outputs = format!("{}/{}", run_path, RUN_OUTPUTS_DIR);
    let mut commands = Vec::new();
    for dir in [run_path, outputs.as_str()] {
        if clean {
            commands.push(format!(
                "if [ -d {dir} ] && [ \"$(ls -A {dir})\" ]; then rm -R {dir}/*; fi;",
                dir = dir
            ));
        }
        commands.push(format!(
            "if [ ! -d \"{dir}\" ]; then mkdir -m 0777 -p {dir}; fi;",
            dir = dir
        ));
    }
    commands
}

/// `polyaxon initializer auth`
pub fn auth_args() -> Vec<String> {
    vec!["polyaxon".into(), "initializer".into(), "auth".into()]
}

/// Repository to clone, resolved from the init item and its connection
#[derive(Clone, Debug, PartialEq)]
pub struct GitTarget {
    /// Clone url
    pub url: String,
    /// Repository name, used as the default clone directory
    pub name: String,
    /// Revision to check out
    pub revision: Option<String>,
    /// Extra clone flags
    pub flags: Vec<String>,
}

impl GitTarget {
    /// Item values win over the connection's schema
    pub fn resolve(git: &GitInit, connection: Option<&GitSchema>) -> Result<Self> {
        let merged = GitInit {
            url: git.url.clone().or_else(|| connection.map(|c| c.url.clone())),
            revision: git
                .revision
                .clone()
                .or_else(|| connection.and_then(|c| c.revision.clone())),
            flags: if git.flags.is_empty() {
                connection.map(|c| c.flags.clone()).unwrap_or_default()
            } else {
                git.flags.clone()
            },
        };
        let url = merged
            .url
            .clone()
            .ok_or_else(|| ConverterError::converter("init.git.url", "a git init needs a url"))?;
        let name = merged.repo_name().ok_or_else(|| {
            ConverterError::converter("init.git.url", format!("no repository name in `{}`", url))
        })?;
        Ok(Self {
            url,
            name,
            revision: merged.revision,
            flags: merged.flags,
        })
    }
}

/// `polyaxon initializer git ...`
pub fn git_args(repo_path: &str, target: &GitTarget, connection: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "polyaxon".to_string(),
        "initializer".to_string(),
        "git".to_string(),
        format!("--repo-path={}", repo_path),
        format!("--url={}", target.url),
    ];
    if let Some(revision) = &target.revision {
        args.push(format!("--revision={}", revision));
    }
    if let Some(connection) = connection {
        args.push(format!("--connection={}", connection));
    }
    if !target.flags.is_empty() {
        args.push(format!("--flags={}", json!(target.flags)));
    }
    args
}

/// `polyaxon initializer file ...`
pub fn file_args(file: &FileInit, filepath: &str, copy_path: Option<&str>, track: bool) -> Vec<String> {
    let mut context = BTreeMap::new();
    context.insert("filename", json!(file.filename));
    context.insert("content", json!(file.content));
    if let Some(kind) = &file.kind {
        context.insert("kind", json!(kind));
    }
    if let Some(chmod) = &file.chmod {
        context.insert("chmod", json!(chmod));
    }
    let mut args = vec![
        "polyaxon".to_string(),
        "initializer".to_string(),
        "file".to_string(),
        format!("--file-context={}", json!(context)),
        format!("--filepath={}", filepath),
    ];
    push_copy_and_track(&mut args, copy_path, track);
    args
}

/// `polyaxon docker generate ...`
pub fn dockerfile_args(
    dockerfile: &DockerfileInit,
    destination: &str,
    copy_path: Option<&str>,
    track: bool,
) -> Result<Vec<String>> {
    let context = serde_json::to_string(dockerfile)?;
    let mut args = vec![
        "polyaxon".to_string(),
        "docker".to_string(),
        "generate".to_string(),
        format!("--build-context={}", context),
        format!("--destination={}", destination),
    ];
    push_copy_and_track(&mut args, copy_path, track);
    Ok(args)
}

/// `polyaxon initializer tensorboard ...`
pub fn tensorboard_args(
    tensorboard: &TensorboardInit,
    context_from: &str,
    context_to: &str,
    connection_kind: &str,
) -> Vec<String> {
    let mut args = vec![
        "polyaxon".to_string(),
        "initializer".to_string(),
        "tensorboard".to_string(),
        format!("--context-from={}", context_from),
        format!("--context-to={}", context_to),
        format!("--connection-kind={}", connection_kind),
    ];
    if let Some(port) = tensorboard.port {
        args.push(format!("--port={}", port));
    }
    if !tensorboard.uuids.is_empty() {
        args.push(format!("--uuids={}", tensorboard.uuids.join(",")));
    }
    if tensorboard.use_names.unwrap_or(false) {
        args.push("--use-names".to_string());
    }
    if let Some(prefix) = &tensorboard.path_prefix {
        args.push(format!("--path-prefix={}", prefix));
    }
    if !tensorboard.plugins.is_empty() {
        args.push(format!("--plugins={}", tensorboard.plugins.join(",")));
    }
    args
}

/// `polyaxon initializer artifacts ...` pulling files and dirs from a store
pub fn artifacts_args(
    connection: &str,
    path_from: Option<&str>,
    files: &[String],
    dirs: &[String],
    path_to: &str,
    workers: Option<u32>,
) -> Vec<String> {
    let mut args = vec![
        "polyaxon".to_string(),
        "initializer".to_string(),
        "artifacts".to_string(),
        format!("--connection={}", connection),
    ];
    if let Some(path_from) = path_from {
        args.push(format!("--path-from={}", path_from));
    }
    args.push(format!("--path-to={}", path_to));
    if !files.is_empty() {
        args.push(format!("--files={}", json!(files)));
    }
    if !dirs.is_empty() {
        args.push(format!("--dirs={}", json!(dirs)));
    }
    if let Some(workers) = workers {
        args.push(format!("--workers={}", workers));
    }
    args
}

fn push_copy_and_track(args: &mut Vec<String>, copy_path: Option<&str>, track: bool) {
    if let Some(copy_path) = copy_path {
        args.push(format!("--copy-path={}", copy_path));
    }
    if track {
        args.push("--track".to_string());
    }
}

/// Init container name; `taken` disambiguates repeated kinds with a counter
pub fn init_name(kind: &str, taken: &[String]) -> String {
    let base = format!("{}-{}", INIT_PREFIX, kind);
    if !taken.contains(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base)
}

/// Generated init container from the template
pub fn init_container(
    name: String,
    template: &ContainerTemplate,
    command: Vec<String>,
    args: Vec<String>,
) -> Container {
    Container {
        name: Some(name),
        image: Some(template.image.clone()),
        image_pull_policy: template.image_pull_policy.clone(),
        command,
        args,
        resources: Some(template.resources.clone().unwrap_or_else(default_init_resources)),
        ..Default::default()
    }
}

/// `(command, args)` running shell commands through `/bin/sh -c`
pub fn shell_command(commands: &[String]) -> (Vec<String>, Vec<String>) {
    (
        vec!["/bin/sh".to_string(), "-c".to_string()],
        vec![commands.join(" ")],
    )
}
