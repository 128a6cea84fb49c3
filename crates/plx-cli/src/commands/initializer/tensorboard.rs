//! Tensorboard initializer: gather the tensorboard outputs of several runs

use std::path::PathBuf;

use clap::Args;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use plx_common::constants::RUN_OUTPUTS_DIR;
use plx_common::Context;
use plx_schema::ConnectionKind;

use crate::{Error, Result};

const TENSORBOARD_DIR: &str = "tensorboard";

#[derive(Args, Debug)]
pub struct TensorboardArgs {
    /// Artifacts root holding `<uuid>/outputs/tensorboard`
    #[arg(long)]
    pub context_from: PathBuf,

    /// Destination, one subdirectory per run
    #[arg(long)]
    pub context_to: PathBuf,

    /// Kind of the artifacts store connection
    #[arg(long)]
    pub connection_kind: String,

    #[arg(long)]
    pub port: Option<u16>,

    /// Comma separated run uuids, defaults to the current run
    #[arg(long, value_delimiter = ',')]
    pub uuids: Vec<String>,

    #[arg(long)]
    pub use_names: bool,

    #[arg(long)]
    pub path_prefix: Option<String>,

    #[arg(long, value_delimiter = ',')]
    pub plugins: Vec<String>,
}

pub async fn run(args: TensorboardArgs, ctx: &Context) -> Result<()> {
    let kind: ConnectionKind = args.connection_kind.parse()?;
    if !kind.is_mount() {
        return Err(Error::validation(format!(
            "tensorboard context from a `{}` store is not supported, use a mounted store",
            kind
        )));
    }
    if args.use_names {
        warn!("run names are not available to the initializer, using uuids");
    }

    let mut uuids = args.uuids.clone();
    if uuids.is_empty() {
        uuids.extend(ctx.connection.run.as_ref().map(|r| r.uuid.clone()));
    }
    if uuids.is_empty() {
        return Err(Error::validation("no run uuids given and no current run"));
    }

    let mut copied = 0;
    for uuid in &uuids {
        let from = args.context_from.join(uuid).join(RUN_OUTPUTS_DIR).join(TENSORBOARD_DIR);
        if !from.is_dir() {
            warn!(run_uuid = %uuid, path = %from.display(), "run has no tensorboard outputs");
            continue;
        }
        let to = args.context_to.join(uuid);
        for entry in WalkDir::new(&from) {
            let entry = entry.map_err(|e| Error::command_failed(format!("walking {}: {}", from.display(), e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&from)
                .map_err(|e| Error::command_failed(e.to_string()))?;
            let target = to.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;
        }
        debug!(run_uuid = %uuid, "tensorboard outputs collected");
        copied += 1;
    }

    info!(
        runs = copied,
        port = ?args.port,
        path_prefix = ?args.path_prefix,
        plugins = ?args.plugins,
        "tensorboard context ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_context;

    fn args(from: &std::path::Path, to: &std::path::Path, kind: &str, uuids: &[&str]) -> TensorboardArgs {
        TensorboardArgs {
            context_from: from.to_path_buf(),
            context_to: to.to_path_buf(),
            connection_kind: kind.to_string(),
            port: Some(6006),
            uuids: uuids.iter().map(|s| s.to_string()).collect(),
            use_names: false,
            path_prefix: None,
            plugins: vec![],
        }
    }

    #[tokio::test]
    async fn copies_each_run() {
        let from = tempfile::tempdir().unwrap();
        let to = tempfile::tempdir().unwrap();
        let events = from.path().join("r1/outputs/tensorboard/train/events.out");
        std::fs::create_dir_all(events.parent().unwrap()).unwrap();
        std::fs::write(&events, "e").unwrap();

        run(args(from.path(), to.path(), "volume_claim", &["r1", "r2"]), &test_context(&from))
            .await
            .unwrap();
        assert!(to.path().join("r1/train/events.out").exists());
        assert!(!to.path().join("r2").exists());
    }

    #[tokio::test]
    async fn bucket_stores_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(args(dir.path(), dir.path(), "s3", &["r1"]), &test_context(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn needs_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(args(dir.path(), dir.path(), "host_path", &[]), &test_context(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
