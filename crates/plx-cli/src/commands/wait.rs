//! Wait command

use std::process::ExitCode;

use clap::Args;

use plx_agent::{Executor, KubeExecutor};
use plx_common::constants::ENV_K8S_NAMESPACE;
use plx_common::retry::RetryConfig;
use plx_common::Context;
use plx_schema::RunKind;

use crate::Result;

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Run uuid
    #[arg(long)]
    pub uuid: String,

    /// Run kind
    #[arg(long)]
    pub kind: RunKind,

    /// Polls after the first one before giving up
    #[arg(long, default_value_t = 10)]
    pub max_retries: u32,

    /// Namespace of the Operation, defaults to the context's
    #[arg(long, env = ENV_K8S_NAMESPACE)]
    pub namespace: Option<String>,
}

pub async fn run(args: WaitArgs, ctx: &Context) -> Result<ExitCode> {
    let executor = KubeExecutor::try_default().await?;
    let code = wait_with(&executor, &args, ctx).await;
    Ok(ExitCode::from(code))
}

async fn wait_with(executor: &dyn Executor, args: &WaitArgs, ctx: &Context) -> u8 {
    let namespace = args.namespace.as_deref().unwrap_or_else(|| ctx.namespace());
    let code = plx_agent::wait(
        executor,
        namespace,
        &args.uuid,
        args.kind,
        args.max_retries,
        &RetryConfig::default(),
    )
    .await;
    if code == 0 {
        0
    } else {
        1
    }
}
