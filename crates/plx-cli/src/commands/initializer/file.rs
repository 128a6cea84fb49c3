//! File initializer

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use plx_schema::init::FileInit;

use super::write_atomic;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct FileArgs {
    /// File context as JSON: `{filename, content, kind?, chmod?}`
    #[arg(long)]
    pub file_context: String,

    /// Directory the file is written to
    #[arg(long)]
    pub filepath: PathBuf,

    /// Also copy the file to this directory
    #[arg(long)]
    pub copy_path: Option<PathBuf>,

    /// Record the file as a run artifact
    #[arg(long)]
    pub track: bool,
}

pub async fn run(args: FileArgs) -> Result<()> {
    let file: FileInit = serde_json::from_str(&args.file_context)
        .map_err(|e| Error::validation(format!("invalid file context: {}", e)))?;
    let mode = file.chmod.as_deref().map(parse_mode).transpose()?;

    let mut targets = vec![args.filepath.join(&file.filename)];
    if let Some(copy_path) = &args.copy_path {
        targets.push(copy_path.join(&file.filename));
    }
    for target in &targets {
        write_atomic(target, file.content.as_bytes())?;
        if let Some(mode) = mode {
            set_mode(target, mode)?;
        }
    }
    info!(file = %targets[0].display(), kind = ?file.kind, track = args.track, "file written");
    Ok(())
}

/// File mode from `+x` or an octal string such as `0755`
pub fn parse_mode(chmod: &str) -> Result<u32> {
    match chmod {
        "+x" => Ok(0o755),
        "+r" => Ok(0o644),
        octal => u32::from_str_radix(octal.trim_start_matches("0o"), 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .ok_or_else(|| Error::validation(format!("invalid chmod `{}`", chmod))),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::exec("+x", 0o755)]
    #[case::octal("0700", 0o700)]
    #[case::short("644", 0o644)]
    fn modes(#[case] chmod: &str, #[case] expected: u32) {
        assert_eq!(parse_mode(chmod).unwrap(), expected);
    }

    #[test]
    fn bad_mode() {
        assert!(parse_mode("rwx").is_err());
    }

    #[tokio::test]
    async fn writes_and_copies() {
        let dir = tempfile::tempdir().unwrap();
        let args = FileArgs {
            file_context: json!({"filename": "run.sh", "content": "echo hi", "chmod": "+x"}).to_string(),
            filepath: dir.path().join("init"),
            copy_path: Some(dir.path().join("copy")),
            track: false,
        };
        run(args).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("init/run.sh")).unwrap(), "echo hi");
        assert!(dir.path().join("copy/run.sh").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("init/run.sh")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
