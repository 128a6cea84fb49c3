//! Artifact store synchronisation
//!
//! The main container writes into the run's artifacts context; the sidecar
//! copies files that changed since the last pass into the store. Change
//! detection is by SHA-256 of the content, kept in memory for the lifetime of
//! the sidecar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use plx_common::constants::{RUN_LOGS_DIR, RUN_OUTPUTS_DIR, RUN_SPEC_FILE};
use plx_common::Error;

use crate::Result;

/// Local run directory mirrored into a store directory
#[derive(Debug)]
pub struct ArtifactStore {
    source: PathBuf,
    destination: PathBuf,
    digests: HashMap<PathBuf, String>,
}

impl ArtifactStore {
    /// Mirror of `source` (the run's context directory) into `destination`
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            digests: HashMap::new(),
        }
    }

    /// `<destination>/logs/<pod>.jsonl`
    pub fn logs_path(&self, pod: &str) -> PathBuf {
        self.destination.join(RUN_LOGS_DIR).join(format!("{}.jsonl", pod))
    }

    /// `<destination>/outputs/spec.json`
    pub fn spec_path(&self) -> PathBuf {
        self.destination.join(RUN_OUTPUTS_DIR).join(RUN_SPEC_FILE)
    }

    /// Write the operation spec snapshot, replacing the previous one atomically
    pub async fn write_spec(&self, spec: &Value) -> Result<()> {
        let path = self.spec_path();
        let content = serde_json::to_vec_pretty(spec)?;
        write_atomic(&path, &content).await
    }

    /// Copy every file under `<source>/outputs` whose content changed since
    /// the previous call. Returns the number of files copied.
    pub async fn sync_outputs(&mut self) -> Result<usize> {
        let root = self.source.join(RUN_OUTPUTS_DIR);
        if self.source == self.destination || !root.is_dir() {
            return Ok(0);
        }
        let files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        let mut copied = 0;
        for file in files {
            let Ok(relative) = file.strip_prefix(&self.source) else {
                continue;
            };
            let content = tokio::fs::read(&file).await.map_err(|e| Error::io(&file, e))?;
            let digest = hex::encode(Sha256::digest(&content));
            if self.digests.get(relative) == Some(&digest) {
                continue;
            }
            let target = self.destination.join(relative);
            write_atomic(&target, &content).await?;
            debug!(path = %relative.display(), "uploaded artifact");
            self.digests.insert(relative.to_path_buf(), digest);
            copied += 1;
        }
        Ok(copied)
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| Error::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io(path, e))?;
    Ok(())
}
