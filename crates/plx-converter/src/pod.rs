//! Pod assembly shared by every backend
//!
//! One replica role of a compiled run becomes one `PodTemplateSpec`:
//!
//! - the main container, renamed to `polyaxon-main-job`
//! - init containers in a fixed order: auth, artifacts context, generated
//!   inits (git, file, dockerfile, tensorboard, artifacts, connection), then
//!   user containers
//! - the sidecar and user sidecars
//! - connection and context volumes, de-duplicated by source path
//! - annotations, accelerator-gated scheduling defaults and run labels
//!
//! Assembly is pure: the same inputs always produce the same pod.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use plx_common::constants::{
    CONTEXT_MOUNT_ARTIFACTS, CONTEXT_MOUNT_AUTH, CONTEXT_MOUNT_INIT, CONTEXT_VOLUME_ARTIFACTS,
    CONTEXT_VOLUME_AUTH, CONTEXT_VOLUME_INIT, DOCKER_SOCKET, DOCKER_VOLUME, ENV_LOG_LEVEL,
    ENV_RUN_ARTIFACTS_PATH, ENV_RUN_INSTANCE, ENV_RUN_KIND, ENV_RUN_OUTPUTS_PATH, ENV_RUN_UUID,
    GENERATED_CONTAINER_PREFIX, LABEL_MANAGED_BY, LABEL_OWNER, LABEL_PROJECT, LABEL_RUN_KIND,
    LABEL_RUN_NAME, LABEL_RUN_UUID, MAIN_JOB_CONTAINER, MANAGED_BY, RUN_OUTPUTS_DIR, SHM_MOUNT,
    SHM_VOLUME,
};
use plx_schema::environment::Environment;
use plx_schema::init::{Init, InitKind};
use plx_schema::k8s::{
    Container, EnvFromSource, EnvVar, LocalObjectReference, ObjectMeta, PodSpec, PodTemplateSpec,
    Volume, VolumeMount,
};
use plx_schema::policies::Plugins;
use plx_schema::{CompiledOperation, Connection, ConnectionKind, ConnectionSchema, Replica, RunKind};

use crate::accelerators::Accelerators;
use crate::config::{AcceleratorDefaults, ContainerTemplate, ConverterConfig};
use crate::error::ConverterError;
use crate::init::{
    artifacts_args, auth_args, dockerfile_args, file_args, git_args, init_artifact_context_args,
    init_container, init_name, shell_command, tensorboard_args, GitTarget,
};
use crate::sidecar::sidecar_container;
use crate::volumes::{push_mount, VolumeSet};
use crate::Result;

/// Deterministic name for an unnamed container: `plx-container-<sha256 prefix>`
pub fn generated_container_name(container: &Container) -> Result<String> {
    let bytes = serde_json::to_vec(container)?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok(format!("{}-{}", GENERATED_CONTAINER_PREFIX, &digest[..12]))
}

fn push_env(env: &mut Vec<EnvVar>, var: EnvVar) {
    if !env.iter().any(|e| e.name == var.name) {
        env.push(var);
    }
}

fn init_mount() -> VolumeMount {
    VolumeMount::new(CONTEXT_VOLUME_INIT, CONTEXT_MOUNT_INIT, false)
}

fn artifacts_mount() -> VolumeMount {
    VolumeMount::new(CONTEXT_VOLUME_ARTIFACTS, CONTEXT_MOUNT_ARTIFACTS, false)
}

/// Builds pod templates for the replica roles of one compiled operation
pub struct PodAssembler<'a> {
    compiled: &'a CompiledOperation,
    config: &'a ConverterConfig,
    plugins: Plugins,
    kind: RunKind,
    uuid: String,
    sidecar: bool,
}

/// Pod-wide state accumulated while assembling containers
#[derive(Default)]
struct PodState {
    volumes: VolumeSet,
    init_annotations: BTreeMap<String, String>,
    names: Vec<String>,
}

impl<'a> PodAssembler<'a> {
    /// Assembler for a compiled operation; the run uuid comes from the
    /// config's run metadata or the compiled globals
    pub fn new(compiled: &'a CompiledOperation, config: &'a ConverterConfig) -> Result<Self> {
        let uuid = if config.run.uuid.is_empty() {
            compiled
                .uuid()
                .map(str::to_string)
                .ok_or_else(|| ConverterError::converter("globals.uuid", "a run uuid is required"))?
        } else {
            config.run.uuid.clone()
        };
        Ok(Self {
            compiled,
            config,
            plugins: compiled.plugins(),
            kind: compiled.run_kind(),
            uuid,
            sidecar: true,
        })
    }

    /// Disable the sidecar for backends without a pod API to watch
    pub fn with_sidecar(mut self, enabled: bool) -> Self {
        self.sidecar = enabled;
        self
    }

    /// Run uuid used in names, labels and paths
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Root of the run's artifacts: `<store mount>/<uuid>` for volume stores,
    /// the artifacts context otherwise
    pub fn run_artifacts_path(&self) -> String {
        let root = self
            .config
            .artifacts_store
            .as_ref()
            .and_then(Connection::mount_path)
            .unwrap_or(CONTEXT_MOUNT_ARTIFACTS);
        format!("{}/{}", root.trim_end_matches('/'), self.uuid)
    }

    fn collects_artifacts(&self) -> bool {
        self.config.artifacts_store.is_some() && self.plugins.collect_artifacts_enabled()
    }

    fn lookup(&self, name: &str, requester: &str) -> Result<&'a Connection> {
        self.config
            .connection(name)
            .ok_or_else(|| ConverterError::UnknownConnection {
                name: name.to_string(),
                requester: requester.to_string(),
            })
    }

    /// Labels identifying the run; shared by the pod and the operation
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
            (LABEL_RUN_UUID.to_string(), self.uuid.clone()),
            (LABEL_RUN_KIND.to_string(), self.kind.as_str().to_string()),
        ]);
        let run = &self.config.run;
        let name = run.name.clone().or_else(|| self.compiled.name.clone());
        for (key, value) in [
            (LABEL_RUN_NAME, name),
            (LABEL_OWNER, run.owner.clone()),
            (LABEL_PROJECT, run.project.clone()),
        ] {
            if let Some(value) = value {
                labels.insert(key.to_string(), value);
            }
        }
        labels
    }

    /// Assemble the pod of one replica role
    pub fn assemble(&self, role: &str, pod: &Replica) -> Result<PodTemplateSpec> {
        let path = if role == plx_schema::run::MAIN_ROLE {
            "run".to_string()
        } else {
            format!("run.{}", role.replace('/', "."))
        };
        let mut state = PodState::default();
        state.names.push(MAIN_JOB_CONTAINER.to_string());

        let mut main = self.main_container(pod, &path)?;
        for volume in &pod.volumes {
            state.volumes.add(volume.clone());
        }

        let mut annotations = pod
            .environment
            .as_ref()
            .map(|e| e.annotations.clone())
            .unwrap_or_default();
        for name in &pod.connections {
            let connection = self.lookup(name, MAIN_JOB_CONTAINER)?;
            self.wire_connection(connection, &mut main, &mut state.volumes)?;
            annotations.extend(connection.annotations.clone());
        }

        let store = self.config.artifacts_store.as_ref();
        let store_mount = match store {
            Some(store) => state.volumes.connection_mount(store)?,
            None => None,
        };

        let mut init_containers = Vec::new();
        let auth = self.config.auth_context && self.plugins.auth_enabled();
        if auth {
            state.volumes.add(Volume::empty_dir(CONTEXT_VOLUME_AUTH, false));
            let name = init_name("auth", &state.names);
            let mut container =
                init_container(name.clone(), &self.config.auxiliaries.init, auth_args(), Vec::new());
            container
                .volume_mounts
                .push(VolumeMount::new(CONTEXT_VOLUME_AUTH, CONTEXT_MOUNT_AUTH, false));
            state.names.push(name);
            init_containers.push(container);
            push_mount(
                &mut main.volume_mounts,
                VolumeMount::new(CONTEXT_VOLUME_AUTH, CONTEXT_MOUNT_AUTH, true),
            );
        }

        if store.is_some() {
            state.volumes.add(Volume::empty_dir(CONTEXT_VOLUME_ARTIFACTS, false));
            push_mount(&mut main.volume_mounts, artifacts_mount());
        }
        if self.collects_artifacts() {
            let name = init_name("artifacts-context", &state.names);
            let (command, args) = shell_command(&init_artifact_context_args(
                &self.run_artifacts_path(),
                false,
            ));
            let mut container =
                init_container(name.clone(), &self.config.auxiliaries.init, command, args);
            container.volume_mounts.push(artifacts_mount());
            container.volume_mounts.extend(store_mount.clone());
            state.names.push(name);
            init_containers.push(container);
        }
        if let Some(mount) = &store_mount {
            if self.collects_artifacts() || self.plugins.mount_artifacts_store.unwrap_or(false) {
                push_mount(&mut main.volume_mounts, mount.clone());
            }
        }

        let mut user_inits = Vec::new();
        for (index, item) in pod.init.iter().enumerate() {
            let item_path = format!("{}.init[{}]", path, index);
            let kind = item.kind(&item_path)?;
            let connection = item
                .connection
                .as_deref()
                .map(|name| self.lookup(name, &item_path))
                .transpose()?;
            if let Some(connection) = connection {
                state.init_annotations.extend(connection.annotations.clone());
            }
            let mut container = match kind {
                InitKind::Custom => self.custom_init(item, &mut state)?,
                _ => self.generated_init(item, kind, connection, &item_path, &mut state)?,
            };
            if let Some(connection) = connection {
                self.wire_connection(connection, &mut container, &mut state.volumes)?;
            }
            if auth {
                push_mount(
                    &mut container.volume_mounts,
                    VolumeMount::new(CONTEXT_VOLUME_AUTH, CONTEXT_MOUNT_AUTH, true),
                );
            }
            state.volumes.add(Volume::empty_dir(CONTEXT_VOLUME_INIT, false));
            push_mount(&mut container.volume_mounts, init_mount());
            push_mount(&mut main.volume_mounts, init_mount());
            match kind {
                InitKind::Custom => user_inits.push(container),
                _ => init_containers.push(container),
            }
        }
        init_containers.extend(user_inits);

        annotations.extend(std::mem::take(&mut state.init_annotations));
        if let Some(store) = store {
            annotations.extend(store.annotations.clone());
        }

        self.inject_env(&mut main);
        self.apply_plugins(&mut main, &mut state.volumes);

        let mut containers = vec![main];
        if let (true, Some(template), Some(_)) =
            (self.sidecar && self.plugins.sidecar_enabled(), &self.config.auxiliaries.sidecar, store)
        {
            let mut sidecar = sidecar_container(
                template,
                &self.plugins,
                &self.uuid,
                self.kind,
                &self.config.namespace,
                &[artifacts_mount()],
                store_mount.as_ref(),
            );
            push_env(&mut sidecar.env, EnvVar::new(ENV_RUN_ARTIFACTS_PATH, self.run_artifacts_path()));
            if let Some(instance) = self.config.run.instance() {
                push_env(&mut sidecar.env, EnvVar::new(ENV_RUN_INSTANCE, instance));
            }
            containers.push(sidecar);
        }
        for sidecar in &pod.sidecars {
            let mut sidecar = sidecar.clone();
            if sidecar.name.is_none() {
                sidecar.name = Some(generated_container_name(&sidecar)?);
            }
            containers.push(sidecar);
        }

        let accelerators =
            Accelerators::infer(containers.iter().chain(init_containers.iter()), &annotations)?;
        let environment = self.environment(pod);
        let mut spec = self.pod_spec(&environment);
        self.apply_accelerators(accelerators, &mut spec, &mut containers[0]);
        spec.init_containers = init_containers;
        spec.containers = containers;
        spec.volumes = state.volumes.into_volumes();

        let mut labels = environment.labels.clone();
        labels.extend(self.labels());
        debug!(
            run_uuid = %self.uuid,
            role = role,
            init = spec.init_containers.len(),
            containers = spec.containers.len(),
            "assembled pod"
        );
        Ok(PodTemplateSpec {
            metadata: ObjectMeta {
                name: None,
                namespace: None,
                labels,
                annotations,
            },
            spec,
        })
    }

    fn auxiliary_template(&self) -> Option<&ContainerTemplate> {
        let auxiliaries = &self.config.auxiliaries;
        match self.kind {
            RunKind::Cleaner => auxiliaries.cleaner.as_ref(),
            RunKind::Notifier => auxiliaries.notifier.as_ref(),
            RunKind::Tuner => auxiliaries.tuner.as_ref(),
            _ => None,
        }
    }

    fn main_container(&self, pod: &Replica, path: &str) -> Result<Container> {
        let mut main = match (&pod.container, self.auxiliary_template()) {
            (Some(container), _) => container.clone(),
            (None, Some(template)) => Container {
                image: Some(template.image.clone()),
                image_pull_policy: template.image_pull_policy.clone(),
                resources: template.resources.clone(),
                ..Default::default()
            },
            (None, None) => {
                return Err(ConverterError::converter(
                    format!("{}.container", path),
                    "a main container is required",
                ))
            }
        };
        if main.image.is_none() {
            if let Some(template) = self.auxiliary_template() {
                main.image = Some(template.image.clone());
            }
        }
        main.name = Some(MAIN_JOB_CONTAINER.to_string());
        Ok(main)
    }

    fn wire_connection(
        &self,
        connection: &Connection,
        container: &mut Container,
        volumes: &mut VolumeSet,
    ) -> Result<()> {
        if let Some(mount) = volumes.connection_mount(connection)? {
            push_mount(&mut container.volume_mounts, mount);
        }
        for (resource, config_map) in [(&connection.secret, false), (&connection.config_map, true)] {
            let Some(resource) = resource else { continue };
            if let Some(mount) = volumes.resource_mount(connection, resource, config_map)? {
                push_mount(&mut container.volume_mounts, mount);
            } else if resource.items.is_empty() {
                let reference = Some(LocalObjectReference {
                    name: resource.name.clone(),
                });
                let source = if config_map {
                    EnvFromSource {
                        config_map_ref: reference,
                        secret_ref: None,
                    }
                } else {
                    EnvFromSource {
                        config_map_ref: None,
                        secret_ref: reference,
                    }
                };
                if !container.env_from.contains(&source) {
                    container.env_from.push(source);
                }
            } else {
                for key in &resource.items {
                    let var = if config_map {
                        EnvVar::from_config_map(key, &resource.name, key)
                    } else {
                        EnvVar::from_secret(key, &resource.name, key)
                    };
                    push_env(&mut container.env, var);
                }
            }
        }
        for var in &connection.env {
            push_env(&mut container.env, var.clone());
        }
        Ok(())
    }

    fn custom_init(&self, item: &Init, state: &mut PodState) -> Result<Container> {
        let mut container = item.container.clone().unwrap_or_default();
        let template = &self.config.auxiliaries.init;
        if container.image.is_none() {
            container.image = Some(template.image.clone());
            container.image_pull_policy = template.image_pull_policy.clone();
        }
        if container.resources.is_none() {
            container.resources = Some(
                template
                    .resources
                    .clone()
                    .unwrap_or_else(crate::init::default_init_resources),
            );
        }
        if container.name.is_none() {
            container.name = Some(generated_container_name(&container)?);
        }
        if let Some(name) = &container.name {
            state.names.push(name.clone());
        }
        Ok(container)
    }

    fn generated_init(
        &self,
        item: &Init,
        kind: InitKind,
        connection: Option<&Connection>,
        item_path: &str,
        state: &mut PodState,
    ) -> Result<Container> {
        let target = item.path.as_deref().unwrap_or(CONTEXT_MOUNT_INIT);
        let track = self.plugins.collect_artifacts_enabled();
        let store = self.config.artifacts_store.as_ref();
        let mut uses_store = false;

        let (label, args) = match kind {
            InitKind::Artifacts => {
                let source = connection.or(store).ok_or_else(|| {
                    ConverterError::converter(item_path, "an artifacts init needs a connection or an artifacts store")
                })?;
                uses_store = connection.is_none();
                let spec = item.artifacts.clone().unwrap_or_default();
                let mut dirs = spec.dirs.clone();
                dirs.extend(item.paths.clone().unwrap_or_default());
                (
                    "artifacts",
                    artifacts_args(&source.name, source.store_path(), &spec.files, &dirs, target, spec.workers),
                )
            }
            InitKind::Git => {
                let git = item.git.clone().unwrap_or_default();
                let schema = git_schema(connection);
                let resolved = GitTarget::resolve(&git, schema).map_err(|e| at(e, item_path))?;
                let repo_path = item
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", CONTEXT_MOUNT_INIT, resolved.name));
                (
                    "git",
                    git_args(&repo_path, &resolved, connection.map(|c| c.name.as_str())),
                )
            }
            InitKind::File => {
                let file = item.file.as_ref().ok_or_else(|| {
                    ConverterError::converter(item_path, "a file init needs a file")
                })?;
                ("file", file_args(file, CONTEXT_MOUNT_INIT, item.path.as_deref(), track))
            }
            InitKind::Dockerfile => {
                let dockerfile = item.dockerfile.as_ref().ok_or_else(|| {
                    ConverterError::converter(item_path, "a dockerfile init needs a dockerfile")
                })?;
                (
                    "dockerfile",
                    dockerfile_args(dockerfile, CONTEXT_MOUNT_INIT, item.path.as_deref(), track)?,
                )
            }
            InitKind::Tensorboard => {
                let source = connection.or(store).ok_or_else(|| {
                    ConverterError::converter(item_path, "a tensorboard init needs an artifacts store")
                })?;
                uses_store = connection.is_none();
                let tensorboard = item.tensorboard.clone().unwrap_or_default();
                let from = source.store_path().unwrap_or(CONTEXT_MOUNT_ARTIFACTS);
                (
                    "tensorboard",
                    tensorboard_args(&tensorboard, from, target, source.kind.as_str()),
                )
            }
            InitKind::Connection => {
                let connection = connection.ok_or_else(|| {
                    ConverterError::converter(item_path, "a connection init needs a connection")
                })?;
                match connection.kind {
                    ConnectionKind::Git => {
                        let resolved = GitTarget::resolve(&Default::default(), git_schema(Some(connection)))
                            .map_err(|e| at(e, item_path))?;
                        let repo_path = item
                            .path
                            .clone()
                            .unwrap_or_else(|| format!("{}/{}", CONTEXT_MOUNT_INIT, resolved.name));
                        ("git", git_args(&repo_path, &resolved, Some(&connection.name)))
                    }
                    kind if kind.is_artifact_store() => (
                        "artifacts",
                        artifacts_args(&connection.name, connection.store_path(), &[], &[], target, None),
                    ),
                    kind => {
                        return Err(ConverterError::converter(
                            item_path,
                            format!("connections of kind `{}` cannot initialize content", kind),
                        ))
                    }
                }
            }
            InitKind::Custom => {
                return Err(ConverterError::converter(
                    item_path,
                    "custom init items are user containers",
                ))
            }
        };

        let name = init_name(label, &state.names);
        state.names.push(name.clone());
        let mut container = init_container(name, &self.config.auxiliaries.init, args, Vec::new());
        if let Some(overrides) = &item.container {
            if overrides.image.is_some() {
                container.image = overrides.image.clone();
                container.image_pull_policy = overrides.image_pull_policy.clone();
            }
            if overrides.resources.is_some() {
                container.resources = overrides.resources.clone();
            }
            for var in &overrides.env {
                push_env(&mut container.env, var.clone());
            }
        }
        if uses_store {
            if let Some(store) = store {
                self.wire_connection(store, &mut container, &mut state.volumes)?;
                state.init_annotations.extend(store.annotations.clone());
            }
        }
        Ok(container)
    }

    fn inject_env(&self, main: &mut Container) {
        push_env(&mut main.env, EnvVar::new(ENV_RUN_UUID, &self.uuid));
        push_env(&mut main.env, EnvVar::new(ENV_RUN_KIND, self.kind.as_str()));
        if let Some(instance) = self.config.run.instance() {
            push_env(&mut main.env, EnvVar::new(ENV_RUN_INSTANCE, instance));
        }
        if self.collects_artifacts() {
            let run_path = self.run_artifacts_path();
            push_env(
                &mut main.env,
                EnvVar::new(ENV_RUN_OUTPUTS_PATH, format!("{}/{}", run_path, RUN_OUTPUTS_DIR)),
            );
            push_env(&mut main.env, EnvVar::new(ENV_RUN_ARTIFACTS_PATH, run_path));
        }
        if let Some(level) = &self.plugins.log_level {
            push_env(&mut main.env, EnvVar::new(ENV_LOG_LEVEL, level));
        }
    }

    fn apply_plugins(&self, main: &mut Container, volumes: &mut VolumeSet) {
        if self.plugins.shm_enabled() {
            volumes.add(Volume::empty_dir(SHM_VOLUME, true));
            push_mount(&mut main.volume_mounts, VolumeMount::new(SHM_VOLUME, SHM_MOUNT, false));
        }
        if self.plugins.docker_enabled() {
            volumes.add(Volume::host_path(DOCKER_VOLUME, DOCKER_SOCKET));
            push_mount(
                &mut main.volume_mounts,
                VolumeMount::new(DOCKER_VOLUME, DOCKER_SOCKET, false),
            );
        }
    }

    /// Scheduling defaults overlaid with the replica's environment
    fn environment(&self, pod: &Replica) -> Environment {
        let defaults = &self.config.scheduling;
        let base = Environment {
            node_selector: defaults.node_selector.clone(),
            tolerations: defaults.tolerations.clone(),
            affinity: defaults.affinity.clone(),
            image_pull_secrets: defaults.image_pull_secrets.clone(),
            service_account_name: defaults.service_account_name.clone(),
            ..Default::default()
        };
        match &pod.environment {
            Some(environment) => base.overlay(environment),
            None => base,
        }
    }

    fn pod_spec(&self, environment: &Environment) -> PodSpec {
        let restart_policy = environment.restart_policy.clone().or_else(|| {
            (self.kind != RunKind::Service).then(|| "Never".to_string())
        });
        PodSpec {
            restart_policy,
            service_account_name: environment.service_account_name.clone(),
            node_selector: environment.node_selector.clone(),
            node_name: environment.node_name.clone(),
            affinity: environment.affinity.clone(),
            tolerations: environment.tolerations.clone(),
            host_aliases: environment.host_aliases.clone(),
            security_context: environment.security_context.clone(),
            image_pull_secrets: environment
                .image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
            host_network: environment.host_network,
            host_pid: environment.host_pid,
            dns_policy: environment.dns_policy.clone(),
            dns_config: environment.dns_config.clone(),
            scheduler_name: environment.scheduler_name.clone(),
            priority_class_name: environment.priority_class_name.clone(),
            priority: environment.priority,
            ..Default::default()
        }
    }

    fn apply_accelerators(&self, found: Accelerators, spec: &mut PodSpec, main: &mut Container) {
        let defaults = &self.config.scheduling;
        let gated: [(bool, &Option<AcceleratorDefaults>); 2] =
            [(found.gpu, &defaults.gpu), (found.tpu, &defaults.tpu)];
        for (requested, accelerator) in gated {
            let (true, Some(accelerator)) = (requested, accelerator) else {
                continue;
            };
            for (key, value) in &accelerator.node_selector {
                spec.node_selector
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            for toleration in &accelerator.tolerations {
                if !spec.tolerations.contains(toleration) {
                    spec.tolerations.push(toleration.clone());
                }
            }
            for var in &accelerator.env {
                push_env(&mut main.env, var.clone());
            }
        }
    }
}

fn git_schema(connection: Option<&Connection>) -> Option<&plx_schema::connections::GitSchema> {
    match connection.and_then(|c| c.schema.as_ref()) {
        Some(ConnectionSchema::Git(schema)) => Some(schema),
        _ => None,
    }
}

fn at(err: ConverterError, item_path: &str) -> ConverterError {
    match err {
        ConverterError::Converter { path, message } => ConverterError::Converter {
            path: format!("{}.{}", item_path, path.trim_start_matches("init.")),
            message,
        },
        other => other,
    }
}
