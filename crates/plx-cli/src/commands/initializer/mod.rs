//! Initializer commands run by init containers before the main container

use std::path::Path;
use std::process::ExitCode;

use clap::{Args, Subcommand};

use plx_common::Context;

use crate::{Error, Result};

pub mod artifacts;
pub mod auth;
pub mod file;
pub mod git;
pub mod tensorboard;

#[derive(Args, Debug)]
pub struct InitializerArgs {
    #[command(subcommand)]
    pub command: InitializerCommands,
}

#[derive(Subcommand, Debug)]
pub enum InitializerCommands {
    /// Write the auth context for the main container
    Auth(auth::AuthArgs),
    /// Pull files and directories from a store
    Artifacts(artifacts::ArtifactsArgs),
    /// Clone a repository
    Git(git::GitArgs),
    /// Write an inline file
    File(file::FileArgs),
    /// Render a Dockerfile
    Dockerfile(super::docker::GenerateArgs),
    /// Collect run outputs for tensorboard
    Tensorboard(tensorboard::TensorboardArgs),
}

pub async fn run(args: InitializerArgs, ctx: &Context) -> Result<ExitCode> {
    match args.command {
        InitializerCommands::Auth(args) => auth::run(args, ctx).await?,
        InitializerCommands::Artifacts(args) => artifacts::run(args).await?,
        InitializerCommands::Git(args) => git::run(args).await?,
        InitializerCommands::File(args) => file::run(args).await?,
        InitializerCommands::Dockerfile(args) => {
            super::docker::generate(&args)?;
        }
        InitializerCommands::Tensorboard(args) => tensorboard::run(args, ctx).await?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Write through a temp file in the same directory and rename into place
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::validation(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, content).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

/// Parse a JSON list flag such as `--files=["a","b"]`
pub(crate) fn json_list(flag: &str, value: Option<&str>) -> Result<Vec<String>> {
    match value {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("--{} expects a JSON list of strings: {}", flag, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("nested/.file.txt.tmp").exists());
    }

    #[test]
    fn json_lists() {
        assert!(json_list("files", None).unwrap().is_empty());
        assert_eq!(json_list("files", Some(r#"["a","b"]"#)).unwrap(), vec!["a", "b"]);
        assert!(json_list("files", Some("a,b")).is_err());
    }
}
