//! Git initializer

use std::path::{Path, PathBuf};

use clap::Args;
use git2::build::CheckoutBuilder;
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use tracing::{info, warn};

use super::json_list;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct GitArgs {
    /// Clone destination
    #[arg(long)]
    pub repo_path: PathBuf,

    /// Repository url
    #[arg(long)]
    pub url: String,

    /// Branch, tag or commit to check out
    #[arg(long)]
    pub revision: Option<String>,

    /// Connection the repository comes from
    #[arg(long)]
    pub connection: Option<String>,

    /// JSON list of extra clone flags
    #[arg(long)]
    pub flags: Option<String>,
}

/// Clone options understood from `git clone` style flags
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloneFlags {
    pub depth: Option<i32>,
    pub recurse_submodules: bool,
}

impl CloneFlags {
    /// Unknown flags are logged and skipped
    pub fn parse(flags: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = flags.iter();
        while let Some(flag) = iter.next() {
            let (name, inline) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag.as_str(), None),
            };
            match name {
                "--depth" => {
                    let value = inline
                        .or_else(|| iter.next().cloned())
                        .ok_or_else(|| Error::validation("--depth needs a value"))?;
                    parsed.depth = Some(
                        value
                            .parse()
                            .map_err(|_| Error::validation(format!("invalid --depth `{}`", value)))?,
                    );
                }
                "--recurse-submodules" | "--recursive" => parsed.recurse_submodules = true,
                other => warn!(flag = %other, "unsupported git flag ignored"),
            }
        }
        Ok(parsed)
    }
}

pub async fn run(args: GitArgs) -> Result<()> {
    let flags = CloneFlags::parse(&json_list("flags", args.flags.as_deref())?)?;
    let GitArgs {
        repo_path,
        url,
        revision,
        connection,
        ..
    } = args;
    let path = repo_path.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let repo = clone_repo(&url, &path, &flags)?;
        if let Some(revision) = &revision {
            checkout_revision(&repo, revision)?;
        }
        if flags.recurse_submodules {
            update_submodules(&repo)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::command_failed(format!("git clone task failed: {}", e)))??;
    info!(path = %repo_path.display(), connection = ?connection, "repository cloned");
    Ok(())
}

/// Clone a git repository to a local path
pub fn clone_repo(url: &str, path: &Path, flags: &CloneFlags) -> Result<Repository> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|_url, username_from_url, allowed_types| {
        if allowed_types.contains(git2::CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        Cred::default()
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);
    if let Some(depth) = flags.depth {
        fetch_options.depth(depth);
    }

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options);
    Ok(builder.clone(url, path)?)
}

/// Check out a branch, or detach at a tag or commit
pub fn checkout_revision(repo: &Repository, revision: &str) -> Result<()> {
    let branch_ref = format!("refs/remotes/origin/{revision}");
    if let Ok(reference) = repo.find_reference(&branch_ref) {
        let commit = reference.peel_to_commit()?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        if repo.find_branch(revision, git2::BranchType::Local).is_err() {
            repo.branch(revision, &commit, false)?;
        }
        repo.set_head(&format!("refs/heads/{revision}"))?;
        return Ok(());
    }

    let object = repo.revparse_single(revision)?;
    let commit = object.peel_to_commit()?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(commit.id())?;
    Ok(())
}

fn update_submodules(repo: &Repository) -> Result<()> {
    for mut submodule in repo.submodules()? {
        submodule.update(true, None)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn commit(repo: &Repository, file: &str, content: &str, message: &str) -> git2::Oid {
        let root = repo.workdir().unwrap();
        std::fs::write(root.join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("plx", "plx@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parents: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
    }

    fn origin() -> (tempfile::TempDir, git2::Oid, git2::Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit(&repo, "train.py", "v1", "first");
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("dev", &head, false).unwrap();
        let second = commit(&repo, "train.py", "v2", "second");
        (dir, first, second)
    }

    #[rstest]
    #[case::depth_inline(&["--depth=1"], Some(1), false)]
    #[case::depth_split(&["--depth", "5"], Some(5), false)]
    #[case::submodules(&["--recurse-submodules", "--quiet"], None, true)]
    fn parses_flags(#[case] flags: &[&str], #[case] depth: Option<i32>, #[case] recurse: bool) {
        let flags: Vec<String> = flags.iter().map(|s| s.to_string()).collect();
        let parsed = CloneFlags::parse(&flags).unwrap();
        assert_eq!(parsed.depth, depth);
        assert_eq!(parsed.recurse_submodules, recurse);
    }

    #[test]
    fn bad_depth_is_rejected() {
        assert!(CloneFlags::parse(&["--depth=x".to_string()]).is_err());
    }

    #[tokio::test]
    async fn clones_head() {
        let (origin, _, _) = origin();
        let dest = tempfile::tempdir().unwrap();
        let repo_path = dest.path().join("repo");
        run(GitArgs {
            repo_path: repo_path.clone(),
            url: origin.path().display().to_string(),
            revision: None,
            connection: None,
            flags: None,
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(repo_path.join("train.py")).unwrap(), "v2");
    }

    #[tokio::test]
    async fn checks_out_branch_and_commit() {
        let (origin, first, _) = origin();
        let dest = tempfile::tempdir().unwrap();

        let branch_path = dest.path().join("branch");
        run(GitArgs {
            repo_path: branch_path.clone(),
            url: origin.path().display().to_string(),
            revision: Some("dev".to_string()),
            connection: Some("repo".to_string()),
            flags: None,
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(branch_path.join("train.py")).unwrap(), "v1");

        let commit_path = dest.path().join("commit");
        run(GitArgs {
            repo_path: commit_path.clone(),
            url: origin.path().display().to_string(),
            revision: Some(first.to_string()),
            connection: None,
            flags: None,
        })
        .await
        .unwrap();
        let repo = Repository::open(&commit_path).unwrap();
        assert!(repo.head_detached().unwrap());
        assert_eq!(repo.head().unwrap().peel_to_commit().unwrap().id(), first);
    }
}
