//! Polyaxon CLI
//!
//! Compiles and converts polyaxonfiles, and runs the in-cluster pieces
//! (initializers, sidecar, agent).

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use plx_cli::{normalize_args, Cli};
use plx_common::constants::ENV_LOG_LEVEL;
use plx_common::error::UserFacing;
use plx_common::Context;

#[tokio::main]
async fn main() -> ExitCode {
    let fallback = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args()));
    let result = match Context::load() {
        Ok(ctx) => cli.run(ctx).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.describe());
            ExitCode::FAILURE
        }
    }
}
