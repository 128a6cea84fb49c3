//! Init items: content materialized by init containers before the main
//! container starts

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::k8s::{lenient_string_list, Container};
use crate::SchemaError;

/// Artifacts to download from the artifacts store
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsInit {
    /// Files to pull
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Directories to pull
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dirs: Vec<String>,
    /// Parallel download workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
}

/// Git repository to clone
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitInit {
    /// Repository url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Commit, branch or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Extra `git clone` flags
    #[serde(default, deserialize_with = "lenient_string_list", skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl GitInit {
    /// Repository name derived from the url (`.../repo.git` → `repo`)
    pub fn repo_name(&self) -> Option<String> {
        let url = self.url.as_deref()?.trim_end_matches('/');
        let last = url.rsplit(['/', ':']).next()?;
        let name = last.strip_suffix(".git").unwrap_or(last);
        (!name.is_empty()).then(|| name.to_string())
    }
}

/// Inline file to write
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInit {
    /// File name
    pub filename: String,
    /// File content
    pub content: String,
    /// Artifact kind for lineage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Octal mode, e.g. `+x` or `0755`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chmod: Option<String>,
}

/// Dockerfile to generate
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerfileInit {
    /// Base image
    pub image: String,
    /// Env vars, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
    /// Entries appended to `PATH`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    /// `COPY` entries, either `src` or `[src, dst]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy: Vec<Value>,
    /// `COPY` entries applied after `RUN`
    #[serde(default, alias = "post_run_copy", skip_serializing_if = "Vec::is_empty")]
    pub post_run_copy: Vec<Value>,
    /// `RUN` commands
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
    /// Locale for `LANG`/`LC_ALL`
    #[serde(default, alias = "lang_env", skip_serializing_if = "Option::is_none")]
    pub lang_env: Option<String>,
    /// User id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Group id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// User name created when uid/gid are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Output file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// `WORKDIR`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Host directory copied to `WORKDIR`
    #[serde(default, alias = "workdir_path", skip_serializing_if = "Option::is_none")]
    pub workdir_path: Option<String>,
    /// Shell used for `RUN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Tensorboard context to prepare
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TensorboardInit {
    /// Tensorboard port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Runs whose outputs are loaded
    #[serde(default, deserialize_with = "lenient_string_list", skip_serializing_if = "Vec::is_empty")]
    pub uuids: Vec<String>,
    /// Use run names instead of uuids for the log dirs
    #[serde(default, alias = "use_names", skip_serializing_if = "Option::is_none")]
    pub use_names: Option<bool>,
    /// Url path prefix
    #[serde(default, alias = "path_prefix", skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Extra pip plugins
    #[serde(default, deserialize_with = "lenient_string_list", skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
}

/// One init item of a replica
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Init {
    /// Artifacts to pull from the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactsInit>,
    /// Plain paths to pull from the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    /// Git repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInit>,
    /// Inline file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInit>,
    /// Generated dockerfile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<DockerfileInit>,
    /// Tensorboard context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensorboard: Option<TensorboardInit>,
    /// Connection backing the init
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Target path (defaults to the artifacts context)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Container override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

/// Discriminant of an init item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InitKind {
    /// Artifacts or paths from the store
    Artifacts,
    /// Git clone
    Git,
    /// Inline file
    File,
    /// Generated dockerfile
    Dockerfile,
    /// Tensorboard context
    Tensorboard,
    /// Connection-only init, materialized from the connection's kind
    Connection,
    /// User container only
    Custom,
}

impl fmt::Display for InitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Artifacts => "artifacts",
            Self::Git => "git",
            Self::File => "file",
            Self::Dockerfile => "dockerfile",
            Self::Tensorboard => "tensorboard",
            Self::Connection => "connection",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl Init {
    /// Determine the init kind, rejecting items that declare several
    pub fn kind(&self, path: &str) -> Result<InitKind, SchemaError> {
        let mut kinds = Vec::new();
        if self.artifacts.is_some() || self.paths.is_some() {
            kinds.push(InitKind::Artifacts);
        }
        if self.git.is_some() {
            kinds.push(InitKind::Git);
        }
        if self.file.is_some() {
            kinds.push(InitKind::File);
        }
        if self.dockerfile.is_some() {
            kinds.push(InitKind::Dockerfile);
        }
        if self.tensorboard.is_some() {
            kinds.push(InitKind::Tensorboard);
        }

        match kinds.as_slice() {
            [] if self.connection.is_some() => Ok(InitKind::Connection),
            [] if self.container.is_some() => Ok(InitKind::Custom),
            [] => Err(SchemaError::schema(
                path,
                "one of artifacts, paths, git, file, dockerfile, tensorboard, connection, container",
                "an empty init item",
            )),
            [kind] => Ok(*kind),
            many => Err(SchemaError::schema(
                path,
                "a single init kind",
                many.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_single_kind() {
        let init: Init = serde_json::from_value(json!({"git": {"url": "https://github.com/x/y.git"}}))
            .unwrap();
        assert_eq!(init.kind("init[0]").unwrap(), InitKind::Git);
        assert_eq!(init.git.unwrap().repo_name().as_deref(), Some("y"));
    }

    #[test]
    fn connection_only_init() {
        let init: Init = serde_json::from_value(json!({"connection": "data"})).unwrap();
        assert_eq!(init.kind("init[0]").unwrap(), InitKind::Connection);
    }

    #[test]
    fn rejects_multiple_kinds() {
        let init: Init = serde_json::from_value(json!({
            "git": {"url": "u"},
            "file": {"filename": "a.sh", "content": "echo"},
        }))
        .unwrap();
        let err = init.kind("init[1]").unwrap_err();
        assert_eq!(err.path().as_deref(), Some("init[1]"));
    }

    #[test]
    fn rejects_empty_item() {
        assert!(Init::default().kind("init[0]").is_err());
    }

    #[test]
    fn dockerfile_env_pairs() {
        let init: DockerfileInit = serde_json::from_value(json!({
            "image": "python:3.11",
            "env": [["A", "1"], ["B", "2"]],
            "post_run_copy": ["a.txt"],
        }))
        .unwrap();
        assert_eq!(init.env[1], ("B".to_string(), "2".to_string()));
        assert_eq!(init.post_run_copy.len(), 1);
    }
}
