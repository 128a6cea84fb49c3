//! The `polyaxon` command line

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use plx_common::Context;

/// Polyaxon - compile, convert and run ML operations
#[derive(Parser, Debug)]
#[command(name = "polyaxon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate polyaxonfiles, or print the version
    Check(commands::check::CheckArgs),
    /// Print the backend manifest of a polyaxonfile
    Convert(commands::convert::ConvertArgs),
    /// Docker helpers
    Docker(commands::docker::DockerArgs),
    /// Prepare content for the main container
    Initializer(commands::initializer::InitializerArgs),
    /// Block until a run's backend object is gone
    Wait(commands::wait::WaitArgs),
    /// Collect logs and artifacts next to the main container
    Sidecar(commands::sidecar::SidecarArgs),
    /// Run the cluster agent
    Agent(commands::agent::AgentArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, ctx: Context) -> Result<ExitCode> {
        match self.command {
            Commands::Check(args) => commands::check::run(args, ctx).await,
            Commands::Convert(args) => commands::convert::run(args, &ctx).await,
            Commands::Docker(args) => commands::docker::run(args).await,
            Commands::Initializer(args) => commands::initializer::run(args, &ctx).await,
            Commands::Wait(args) => commands::wait::run(args, &ctx).await,
            Commands::Sidecar(args) => commands::sidecar::run(args, &ctx).await,
            Commands::Agent(args) => commands::agent::run(args, &ctx).await,
        }
    }
}

/// Rewrite `-HP` (a two-letter short flag clap cannot express) to `--hparam`
pub fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| match arg.strip_prefix("-HP") {
            Some("") => "--hparam".to_string(),
            Some(rest) if rest.starts_with('=') => format!("--hparam{}", rest),
            _ => arg,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hp_flag_is_rewritten() {
        assert_eq!(
            normalize_args(args(&["polyaxon", "check", "-HP", "lr=choice:[0.1,0.2]", "-HP=bs=range:1:4:1"])),
            args(&["polyaxon", "check", "--hparam", "lr=choice:[0.1,0.2]", "--hparam=bs=range:1:4:1"])
        );
    }

    #[test]
    fn check_parses_files_and_params() {
        let cli = Cli::try_parse_from(normalize_args(args(&[
            "polyaxon", "check", "-f", "a.yaml", "-f", "b.yaml", "-P", "lr=0.1", "-HP", "bs=choice:[16,32]",
        ])))
        .unwrap();
        let Commands::Check(check) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(check.files.len(), 2);
        assert_eq!(check.params, vec!["lr=0.1"]);
        assert_eq!(check.hparams, vec!["bs=choice:[16,32]"]);
    }

    #[test]
    fn wait_defaults_to_ten_retries() {
        let cli = Cli::try_parse_from(args(&["polyaxon", "wait", "--uuid", "abc", "--kind", "job"])).unwrap();
        let Commands::Wait(wait) = cli.command else {
            panic!("expected wait");
        };
        assert_eq!(wait.max_retries, 10);
    }

    #[test]
    fn sidecar_accepts_negative_sync_interval() {
        let cli = Cli::try_parse_from(args(&[
            "polyaxon",
            "sidecar",
            "--container-id=polyaxon-main-job",
            "--sleep-interval=2",
            "--sync-interval=-1",
            "--run-uuid=abc",
            "--pod-name=pod-0",
        ]))
        .unwrap();
        let Commands::Sidecar(sidecar) = cli.command else {
            panic!("expected sidecar");
        };
        assert_eq!(sidecar.sync_interval, -1);
    }
}
