//! Sidecar command

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use plx_agent::HttpControlPlane;
use plx_common::constants::{
    CONTEXT_MOUNT_ARTIFACTS, ENV_CONTAINER_ID, ENV_K8S_NAMESPACE, ENV_POD_NAME, ENV_RUN_ARTIFACTS_PATH,
    ENV_RUN_UUID,
};
use plx_common::retry::RetryConfig;
use plx_common::Context;
use plx_sidecar::{
    ArtifactStore, KubeInspector, LogCollector, Sidecar, SidecarConfig, SidecarError, StatusReporter,
};

use crate::Result;

const REPORT_ATTEMPTS: u32 = 5;

#[derive(Args, Debug)]
pub struct SidecarArgs {
    /// Name of the main container
    #[arg(long, env = ENV_CONTAINER_ID)]
    pub container_id: String,

    /// Seconds between two checks of the main container
    #[arg(long, default_value_t = 10)]
    pub sleep_interval: u64,

    /// Seconds between two syncs, `0` or less syncs only at the end
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub sync_interval: i64,

    #[arg(long, env = ENV_RUN_UUID)]
    pub run_uuid: String,

    #[arg(long, env = ENV_POD_NAME)]
    pub pod_name: String,

    #[arg(long, env = ENV_K8S_NAMESPACE)]
    pub namespace: Option<String>,

    /// Store directory of the run, defaults to the local artifacts context
    #[arg(long, env = ENV_RUN_ARTIFACTS_PATH)]
    pub artifacts_path: Option<PathBuf>,

    /// Seconds allowed for the last sync after a shutdown signal
    #[arg(long, default_value_t = 30)]
    pub flush_timeout: u64,
}

impl SidecarArgs {
    fn config(&self) -> SidecarConfig {
        SidecarConfig {
            sleep_interval: self.sleep_interval,
            sync_interval: self.sync_interval,
            flush_timeout: Duration::from_secs(self.flush_timeout),
        }
    }

    fn store(&self) -> ArtifactStore {
        let source = Path::new(CONTEXT_MOUNT_ARTIFACTS).join(&self.run_uuid);
        let destination = self.artifacts_path.clone().unwrap_or_else(|| source.clone());
        ArtifactStore::new(source, destination)
    }
}

pub async fn run(args: SidecarArgs, ctx: &Context) -> Result<ExitCode> {
    let namespace = args.namespace.as_deref().unwrap_or_else(|| ctx.namespace());
    let client = kube::Client::try_default().await?;
    let inspector = KubeInspector::new(client, namespace, &args.pod_name, &args.container_id, &args.run_uuid);

    let mut sidecar = Sidecar::new(
        Arc::new(inspector),
        args.store(),
        LogCollector::new(&args.pod_name, &args.container_id),
        args.config(),
    );
    if let Some(reporter) = reporter(ctx)? {
        sidecar = sidecar.with_reporter(reporter);
    }

    match sidecar.run(super::shutdown_token()).await {
        Ok(state) => {
            info!(state = ?state, "main container done");
            Ok(ExitCode::SUCCESS)
        }
        Err(SidecarError::Cancelled) => {
            info!("sidecar stopped by signal after the final sync");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn reporter(ctx: &Context) -> Result<Option<StatusReporter>> {
    let Some(run) = ctx.connection.run.clone() else {
        return Ok(None);
    };
    if ctx.client.host.is_none() {
        warn!(run = %run, "no platform host configured, final status is not reported");
        return Ok(None);
    }
    let control_plane = HttpControlPlane::new(&ctx.client, None)?;
    let retry = RetryConfig {
        max_attempts: REPORT_ATTEMPTS,
        ..Default::default()
    };
    Ok(Some(StatusReporter::new(Arc::new(control_plane), run, retry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_context;

    fn args(artifacts_path: Option<&str>) -> SidecarArgs {
        SidecarArgs {
            container_id: "polyaxon-main-job".to_string(),
            sleep_interval: 2,
            sync_interval: -1,
            run_uuid: "abc".to_string(),
            pod_name: "pod-0".to_string(),
            namespace: None,
            artifacts_path: artifacts_path.map(PathBuf::from),
            flush_timeout: 5,
        }
    }

    #[test]
    fn config_from_flags() {
        let config = args(None).config();
        assert_eq!(config.sleep_interval, 2);
        assert_eq!(config.sync_interval, -1);
        assert_eq!(config.flush_timeout, Duration::from_secs(5));
    }

    #[test]
    fn store_defaults_to_the_artifacts_context() {
        let store = args(None).store();
        assert_eq!(store.spec_path(), Path::new("/plx-context/artifacts/abc/outputs/spec.json"));

        let store = args(Some("/store/abc")).store();
        assert_eq!(store.logs_path("pod-0"), Path::new("/store/abc/logs/pod-0.jsonl"));
    }

    #[test]
    fn no_run_instance_means_no_reporter() {
        let dir = tempfile::tempdir().unwrap();
        assert!(reporter(&test_context(&dir)).unwrap().is_none());
    }

    #[test]
    fn reporter_needs_a_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(&dir);
        ctx.connection.run = Some("acme.vision.runs.abc".parse().unwrap());
        assert!(reporter(&ctx).unwrap().is_none());

        ctx.client.host = Some("http://localhost:8000".to_string());
        assert!(reporter(&ctx).unwrap().is_some());
    }
}
