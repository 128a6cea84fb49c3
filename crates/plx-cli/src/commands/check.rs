//! Check command

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Args;
use tracing::{debug, warn};

use plx_common::{Context, VERSION};

use super::{compile, load_operation};
use crate::Result;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the CLI version
    #[arg(long)]
    pub version: bool,

    /// Polyaxonfile(s) to check, later files override earlier ones
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Param override `name=value`
    #[arg(short = 'P', long = "param")]
    pub params: Vec<String>,

    /// Grid param `name=kind:value` (also `-HP`)
    #[arg(long = "hparam")]
    pub hparams: Vec<String>,
}

pub async fn run(args: CheckArgs, mut ctx: Context) -> Result<ExitCode> {
    if args.version {
        println!("{}", VERSION);
        ctx.cli.current_version = Some(VERSION.to_string());
        ctx.cli.last_check = Some(Utc::now());
        ctx.cli.check_count = 0;
        if let Err(e) = ctx.save_cli() {
            warn!(error = %e, "could not record the version check");
        }
        if args.files.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let operation = load_operation(&args.files, &args.params, &args.hparams)?;
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    debug!(uuid = %uuid, "compiling with a throwaway run uuid");
    let compiled = compile(operation, &ctx, &args.files, &Default::default(), &uuid).await?;

    for file in &args.files {
        println!("  {} valid", file.display());
    }
    println!("{}", summary(&compiled));
    Ok(ExitCode::SUCCESS)
}

fn summary(compiled: &plx_schema::CompiledOperation) -> String {
    let mut line = format!("kind: {}", compiled.run_kind());
    if let Some(name) = &compiled.name {
        line.push_str(&format!(", name: {}", name));
    }
    if let Some(matrix) = &compiled.matrix {
        line.push_str(&format!(", matrix: {}", matrix.kind()));
    }
    if !compiled.params.is_empty() {
        let names: Vec<&str> = compiled.params.keys().map(String::as_str).collect();
        line.push_str(&format!(", params: {}", names.join(",")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_context;
    use crate::Error;

    #[tokio::test]
    async fn version_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir);
        let home = ctx.home.clone();
        let args = CheckArgs {
            version: true,
            files: vec![],
            params: vec![],
            hparams: vec![],
        };
        run(args, ctx).await.unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(home.join(".cli")).unwrap()).unwrap();
        assert_eq!(saved["current_version"], VERSION);
        assert_eq!(saved["check_count"], 0);
    }

    #[tokio::test]
    async fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "version: 1.1\nkind: component\nrun:\n  kind: nope\n").unwrap();
        let args = CheckArgs {
            version: false,
            files: vec![path],
            params: vec![],
            hparams: vec![],
        };
        let err = run(args, test_context(&dir)).await.unwrap_err();
        assert!(!matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn valid_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polyaxonfile.yaml");
        std::fs::write(
            &path,
            "version: 1.1\nkind: component\nrun:\n  kind: job\n  container:\n    image: busybox\n",
        )
        .unwrap();
        let args = CheckArgs {
            version: false,
            files: vec![path],
            params: vec![],
            hparams: vec![],
        };
        assert!(run(args, test_context(&dir)).await.is_ok());
    }
}
