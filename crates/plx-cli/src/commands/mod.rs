//! CLI commands

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use plx_compiler::loader::load;
use plx_compiler::params::{parse_hparams, parse_params};
use plx_compiler::{DefaultResolver, HttpHubClient, OperationCompiler};
use plx_common::Context;
use plx_schema::matrix::GridSearch;
use plx_schema::{CompiledOperation, Connection, Globals, Matrix, Operation};

use crate::{Error, Result};

pub mod agent;
pub mod check;
pub mod convert;
pub mod docker;
pub mod initializer;
pub mod sidecar;
pub mod wait;

/// Load polyaxonfiles, apply `-P` params and turn `-HP` params into a grid
pub fn load_operation(files: &[PathBuf], params: &[String], hparams: &[String]) -> Result<Operation> {
    if files.is_empty() {
        return Err(Error::validation("no polyaxonfile given, pass one with -f"));
    }
    let mut operation = load(files)?.into_operation()?;
    operation.params.extend(parse_params(params)?);
    let grid = parse_hparams(hparams)?;
    if !grid.is_empty() {
        debug!(params = ?grid.names(), "grid search from the command line");
        operation.matrix = Some(Matrix::Grid(GridSearch {
            params: grid,
            ..Default::default()
        }));
    }
    Ok(operation)
}

/// Compile an operation, resolving references next to `files` and on the hub
pub async fn compile(
    operation: Operation,
    ctx: &Context,
    files: &[PathBuf],
    connections: &BTreeMap<String, Connection>,
    run_uuid: &str,
) -> Result<CompiledOperation> {
    let base_dir = files
        .first()
        .and_then(|f| f.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut resolver = DefaultResolver::new(base_dir);
    if let Some(host) = &ctx.client.host {
        resolver = resolver.with_hub(Arc::new(HttpHubClient::new(host.clone(), ctx.client.token.clone())));
    }
    let compiled = OperationCompiler::new(operation)
        .with_resolver(&resolver)
        .with_connections(connections)
        .with_globals(Globals::for_run(run_uuid))
        .compile()
        .await?;
    Ok(compiled)
}

/// Token cancelled on SIGTERM or Ctrl+C
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
version: 1.1
kind: component
inputs:
  - name: lr
    type: float
run:
  kind: job
  container:
    image: trainer
    args: ["--lr={{ lr }}"]
"#;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("polyaxonfile.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    pub(crate) fn test_context(dir: &tempfile::TempDir) -> Context {
        let env = std::collections::HashMap::from([(
            plx_common::constants::ENV_HOME.to_string(),
            dir.path().join(".polyaxon").display().to_string(),
        )]);
        Context::from_env(&env).unwrap()
    }

    #[test]
    fn no_files_is_a_validation_error() {
        let err = load_operation(&[], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn hparams_become_a_grid() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write(&dir, JOB)];
        let op = load_operation(&files, &[], &["lr=choice:[0.1, 0.01]".to_string()]).unwrap();
        assert!(matches!(op.matrix, Some(Matrix::Grid(_))));
    }

    #[tokio::test]
    async fn params_feed_the_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write(&dir, JOB)];
        let op = load_operation(&files, &["lr=0.05".to_string()], &[]).unwrap();
        let ctx = test_context(&dir);
        let compiled = compile(op, &ctx, &files, &BTreeMap::new(), "abc").await.unwrap();
        let run = serde_json::to_value(&compiled.run).unwrap();
        assert_eq!(run["container"]["args"][0], "--lr=0.05");
    }
}
