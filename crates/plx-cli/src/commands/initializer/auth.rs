//! Auth context initializer

use std::path::PathBuf;

use clap::Args;
use serde_json::json;
use tracing::info;

use plx_common::constants::CONTEXT_AUTH_FILE;
use plx_common::Context;

use super::write_atomic;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct AuthArgs {
    /// Where the auth context is written
    #[arg(long, default_value = CONTEXT_AUTH_FILE)]
    pub path: PathBuf,
}

pub async fn run(args: AuthArgs, ctx: &Context) -> Result<()> {
    let token = ctx
        .client
        .token
        .as_deref()
        .ok_or_else(|| Error::validation("no auth token in the environment, set POLYAXON_AUTH_TOKEN"))?;
    let context = json!({
        "username": ctx.client.username,
        "token": token,
    });
    write_atomic(&args.path, serde_json::to_string(&context)?.as_bytes())?;
    info!(path = %args.path.display(), "auth context written");
    Ok(())
}
