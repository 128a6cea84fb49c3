//! Artifacts initializer: pull files and directories from a mounted store

use std::path::{Path, PathBuf};

use clap::Args;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::json_list;
use crate::{Error, Result};

const DEFAULT_WORKERS: usize = 4;

#[derive(Args, Debug)]
pub struct ArtifactsArgs {
    /// Connection the store belongs to
    #[arg(long)]
    pub connection: String,

    /// Store path inside the init container
    #[arg(long)]
    pub path_from: Option<PathBuf>,

    /// Destination directory
    #[arg(long)]
    pub path_to: PathBuf,

    /// JSON list of files, relative to the store
    #[arg(long)]
    pub files: Option<String>,

    /// JSON list of directories, relative to the store
    #[arg(long)]
    pub dirs: Option<String>,

    /// Parallel copies
    #[arg(long)]
    pub workers: Option<usize>,
}

pub async fn run(args: ArtifactsArgs) -> Result<()> {
    let source = args.path_from.clone().ok_or_else(|| {
        Error::validation(format!(
            "connection `{}` has no store path to pull from, only mounted stores are supported",
            args.connection
        ))
    })?;
    if !source.is_dir() {
        return Err(Error::validation(format!(
            "store path {} of connection `{}` does not exist",
            source.display(),
            args.connection
        )));
    }
    let files = json_list("files", args.files.as_deref())?;
    let dirs = json_list("dirs", args.dirs.as_deref())?;

    let copies = plan(&source, &args.path_to, &files, &dirs)?;
    let count = copies.len();
    let workers = args.workers.unwrap_or(DEFAULT_WORKERS).max(1);
    debug!(connection = %args.connection, count, workers, "copying artifacts");

    stream::iter(copies)
        .map(|(from, to)| async move {
            tokio::task::spawn_blocking(move || copy_file(&from, &to))
                .await
                .map_err(|e| Error::command_failed(format!("copy task failed: {}", e)))?
        })
        .buffer_unordered(workers)
        .try_collect::<Vec<()>>()
        .await?;

    info!(connection = %args.connection, count, to = %args.path_to.display(), "artifacts pulled");
    Ok(())
}

/// `(from, to)` pairs; with no files and no dirs the whole store is copied
fn plan(source: &Path, target: &Path, files: &[String], dirs: &[String]) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut copies = Vec::new();
    if files.is_empty() && dirs.is_empty() {
        walk(source, target, &mut copies)?;
        return Ok(copies);
    }
    for file in files {
        let from = source.join(file);
        if !from.is_file() {
            return Err(Error::validation(format!("file {} not found in the store", file)));
        }
        copies.push((from, target.join(file)));
    }
    for dir in dirs {
        let from = source.join(dir);
        if !from.is_dir() {
            return Err(Error::validation(format!("directory {} not found in the store", dir)));
        }
        walk(&from, &target.join(dir), &mut copies)?;
    }
    Ok(copies)
}

fn walk(from: &Path, to: &Path, copies: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::command_failed(format!("walking {}: {}", from.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::command_failed(e.to_string()))?;
        copies.push((entry.path().to_path_buf(), to.join(relative)));
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::copy(from, to).map_err(|e| Error::io(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in [("data/a.csv", "a"), ("data/nested/b.csv", "b"), ("model.bin", "m")] {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        dir
    }

    fn args(from: &Path, to: &Path, files: Option<&str>, dirs: Option<&str>) -> ArtifactsArgs {
        ArtifactsArgs {
            connection: "store".to_string(),
            path_from: Some(from.to_path_buf()),
            path_to: to.to_path_buf(),
            files: files.map(str::to_string),
            dirs: dirs.map(str::to_string),
            workers: Some(2),
        }
    }

    #[tokio::test]
    async fn selected_files_and_dirs() {
        let source = store();
        let target = tempfile::tempdir().unwrap();
        run(args(source.path(), target.path(), Some(r#"["model.bin"]"#), Some(r#"["data"]"#)))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(target.path().join("model.bin")).unwrap(), "m");
        assert_eq!(std::fs::read_to_string(target.path().join("data/nested/b.csv")).unwrap(), "b");
    }

    #[tokio::test]
    async fn nothing_selected_copies_everything() {
        let source = store();
        let target = tempfile::tempdir().unwrap();
        run(args(source.path(), target.path(), None, None)).await.unwrap();
        assert!(target.path().join("data/a.csv").exists());
        assert!(target.path().join("model.bin").exists());
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let source = store();
        let target = tempfile::tempdir().unwrap();
        let err = run(args(source.path(), target.path(), Some(r#"["nope"]"#), None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn bucket_without_mount_fails() {
        let target = tempfile::tempdir().unwrap();
        let mut args = args(target.path(), target.path(), None, None);
        args.path_from = None;
        assert!(matches!(run(args).await.unwrap_err(), Error::Validation { .. }));
    }
}
