//! Agent command

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use plx_agent::{Agent, AgentConfig, Executor, HttpControlPlane, KubeExecutor, LocalExecutor};
use plx_common::constants::ENV_AGENT_CONFIG;
use plx_common::Context;
use plx_converter::Backend;

use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Agent config file (YAML or JSON)
    #[arg(long, env = ENV_AGENT_CONFIG)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: AgentArgs, ctx: &Context) -> Result<ExitCode> {
    let config = load_config(&args, ctx)?;
    let agent_instance = ctx
        .connection
        .agent
        .clone()
        .ok_or_else(|| Error::validation("no agent instance, set POLYAXON_AGENT_INSTANCE=<org>.agents.<name>"))?;
    let backend = config.backend()?;
    let executor: Arc<dyn Executor> = match backend {
        Backend::K8s => Arc::new(KubeExecutor::try_default().await?),
        Backend::Docker | Backend::Process => Arc::new(LocalExecutor::new()),
    };
    let control_plane = Arc::new(HttpControlPlane::new(&ctx.client, Some(agent_instance.clone()))?);

    info!(agent = %agent_instance, backend = %backend, namespace = %config.namespace, "starting agent");
    let agent = Agent::new(config, executor, control_plane)?;
    agent.run(super::shutdown_token()).await;
    info!("agent stopped");
    Ok(ExitCode::SUCCESS)
}

fn load_config(args: &AgentArgs, ctx: &Context) -> Result<AgentConfig> {
    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    Ok(config.with_context(ctx)?)
}
