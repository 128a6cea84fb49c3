//! Convert command

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, ValueEnum};
use tracing::debug;

use plx_agent::AgentConfig;
use plx_common::Context;
use plx_converter::{Backend, Converted, Converter, RunMeta};

use super::{compile, load_operation};
use crate::Result;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Polyaxonfile(s) to convert
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Param override `name=value`
    #[arg(short = 'P', long = "param")]
    pub params: Vec<String>,

    /// Target backend: k8s, docker or process
    #[arg(long, default_value = "k8s")]
    pub backend: String,

    /// Agent config providing namespace, connections and the artifacts store
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run uuid, generated when omitted
    #[arg(long)]
    pub uuid: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

pub async fn run(args: ConvertArgs, ctx: &Context) -> Result<ExitCode> {
    let converted = convert(&args, ctx).await?;
    match args.output {
        OutputFormat::Yaml => print!("{}", converted.to_yaml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&converted.to_json()?)?),
    }
    Ok(ExitCode::SUCCESS)
}

async fn convert(args: &ConvertArgs, ctx: &Context) -> Result<Converted> {
    let backend: Backend = args.backend.parse()?;
    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?.with_context(ctx)?,
        None => AgentConfig::default(),
    };
    let uuid = args
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let operation = load_operation(&args.files, &args.params, &[])?;
    let connections: BTreeMap<_, _> = config.connections.iter().map(|c| (c.name.clone(), c.clone())).collect();
    let compiled = compile(operation, ctx, &args.files, &connections, &uuid).await?;

    let run = RunMeta {
        uuid: uuid.clone(),
        name: compiled.name.clone(),
        owner: ctx.connection.run.as_ref().map(|r| r.owner.clone()),
        project: ctx.connection.run.as_ref().map(|r| r.project.clone()),
    };
    debug!(uuid = %uuid, backend = %backend, "converting");
    let converter_config = config.converter_config(run);
    Ok(Converter::new(&compiled, &converter_config).convert(backend)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_context;
    use crate::Error;

    const JOB: &str = r#"
version: 1.1
kind: component
run:
  kind: job
  container:
    image: busybox
    command: ["echo", "hi"]
"#;

    fn args(dir: &tempfile::TempDir, backend: &str) -> ConvertArgs {
        let path = dir.path().join("polyaxonfile.yaml");
        std::fs::write(&path, JOB).unwrap();
        ConvertArgs {
            files: vec![path],
            params: vec![],
            backend: backend.to_string(),
            config: None,
            uuid: Some("abc".to_string()),
            output: OutputFormat::Yaml,
        }
    }

    #[tokio::test]
    async fn job_becomes_an_operation_resource() {
        let dir = tempfile::tempdir().unwrap();
        let converted = convert(&args(&dir, "k8s"), &test_context(&dir)).await.unwrap();
        let json = converted.to_json().unwrap();
        assert_eq!(json["kind"], "Operation");
        assert_eq!(json["metadata"]["name"], "plx-operation-abc");
    }

    #[tokio::test]
    async fn docker_backend_gives_a_plan() {
        let dir = tempfile::tempdir().unwrap();
        let converted = convert(&args(&dir, "docker"), &test_context(&dir)).await.unwrap();
        assert!(matches!(converted, Converted::Docker(_)));
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert(&args(&dir, "nomad"), &test_context(&dir)).await.unwrap_err();
        assert!(matches!(err, Error::Converter(_)));
    }
}
