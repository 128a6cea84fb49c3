//! Sidecar container collecting logs and artifacts next to the main container

use plx_common::constants::{
    ENV_CONTAINER_ID, ENV_K8S_NAMESPACE, ENV_POD_NAME, ENV_RUN_KIND, ENV_RUN_UUID,
    MAIN_JOB_CONTAINER, SIDECAR_CONTAINER,
};
use plx_schema::k8s::{Container, EnvVar, ResourceRequirements, VolumeMount};
use plx_schema::policies::Plugins;
use plx_schema::RunKind;

use crate::config::ContainerTemplate;

/// Resources of the sidecar unless the template overrides them
pub fn default_sidecar_resources() -> ResourceRequirements {
    ResourceRequirements::new(
        &[("cpu", "50m"), ("memory", "60Mi")],
        &[("cpu", "500m"), ("memory", "500Mi")],
    )
}

/// `polyaxon sidecar ...`
pub fn sidecar_args(container_id: &str, sleep_interval: i64, sync_interval: i64) -> Vec<String> {
    vec![
        "polyaxon".to_string(),
        "sidecar".to_string(),
        format!("--container-id={}", container_id),
        format!("--sleep-interval={}", sleep_interval),
        format!("--sync-interval={}", sync_interval),
    ]
}

/// Sidecar for a run
///
/// `artifact_mounts` are forced read-only; the store mount keeps its mode
/// since the sidecar writes logs and uploads there.
pub fn sidecar_container(
    template: &ContainerTemplate,
    plugins: &Plugins,
    run_uuid: &str,
    run_kind: RunKind,
    namespace: &str,
    artifact_mounts: &[VolumeMount],
    store_mount: Option<&VolumeMount>,
) -> Container {
    let (sleep_interval, sync_interval) = plugins.sidecar_intervals();
    let image = plugins
        .sidecar
        .as_ref()
        .and_then(|s| s.image.clone())
        .unwrap_or_else(|| template.image.clone());
    Container {
        name: Some(SIDECAR_CONTAINER.to_string()),
        image: Some(image),
        image_pull_policy: template.image_pull_policy.clone(),
        command: sidecar_args(MAIN_JOB_CONTAINER, sleep_interval, sync_interval),
        env: vec![
            EnvVar::new(ENV_RUN_UUID, run_uuid),
            EnvVar::new(ENV_RUN_KIND, run_kind.as_str()),
            EnvVar::new(ENV_K8S_NAMESPACE, namespace),
            EnvVar::new(ENV_CONTAINER_ID, MAIN_JOB_CONTAINER),
            EnvVar::from_field(ENV_POD_NAME, "metadata.name"),
        ],
        resources: Some(
            template
                .resources
                .clone()
                .unwrap_or_else(default_sidecar_resources),
        ),
        volume_mounts: artifact_mounts
            .iter()
            .map(|m| VolumeMount {
                read_only: Some(true),
                ..m.clone()
            })
            .chain(store_mount.cloned())
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plx_schema::policies::SidecarPlugin;

    #[test]
    fn sidecar_defaults() {
        let template = ContainerTemplate::new("polyaxon/polyaxon-sidecar");
        let mounts = vec![VolumeMount::new("plx-context-artifacts", "/plx-context/artifacts", false)];
        let sidecar = sidecar_container(
            &template,
            &Plugins::default(),
            "abc",
            RunKind::Job,
            "plx",
            &mounts,
            None,
        );

        assert_eq!(sidecar.name.as_deref(), Some("polyaxon-sidecar"));
        assert_eq!(
            sidecar.command,
            vec![
                "polyaxon",
                "sidecar",
                "--container-id=polyaxon-main-job",
                "--sleep-interval=10",
                "--sync-interval=10",
            ]
        );
        assert_eq!(sidecar.resources, Some(default_sidecar_resources()));
        assert_eq!(sidecar.volume_mounts[0].read_only, Some(true));
        assert!(sidecar
            .env
            .iter()
            .any(|e| e.name == "POLYAXON_RUN_KIND" && e.value.as_deref() == Some("job")));
    }

    #[test]
    fn plugin_overrides_image_and_intervals() {
        let plugins = Plugins {
            sidecar: Some(SidecarPlugin {
                sleep_interval: Some(2),
                sync_interval: Some(6),
                image: Some("custom/sidecar:1".into()),
            }),
            ..Default::default()
        };
        let template = ContainerTemplate::new("polyaxon/polyaxon-sidecar");
        let sidecar = sidecar_container(&template, &plugins, "abc", RunKind::Service, "plx", &[], None);
        assert_eq!(sidecar.image.as_deref(), Some("custom/sidecar:1"));
        assert_eq!(sidecar.command[3], "--sleep-interval=2");
        assert_eq!(sidecar.command[4], "--sync-interval=6");
    }
}
