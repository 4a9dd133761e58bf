use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::RepoBuilder;
use git2::{FetchOptions, Repository};
use serde::{Deserialize, Serialize};

use super::FetchError;

/// Metadata of the commit a snapshot was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    pub message: String,
    /// `Name <email>`.
    pub author: String,
}

/// Materializes a repository's files into a directory.
pub trait RepoFetcher: Send + Sync {
    /// Populate `dest`, which does not exist yet, and report the HEAD commit.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` if the repository cannot be retrieved. `dest` may be left
    /// partially written; the caller cleans it up.
    fn fetch(
        &self,
        locator: &str,
        dest: &Path,
    ) -> impl Future<Output = Result<HeadCommit, FetchError>> + Send;
}

/// Clones repositories with libgit2: shallow first, full clone as fallback.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    timeout: Duration,
}

impl GitFetcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RepoFetcher for GitFetcher {
    async fn fetch(&self, locator: &str, dest: &Path) -> Result<HeadCommit, FetchError> {
        let url = locator.trim().to_owned();
        let target: PathBuf = dest.to_path_buf();
        let task = tokio::task::spawn_blocking(move || clone_snapshot(&url, &target));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(FetchError::Task(join.to_string())),
            Err(_) => Err(FetchError::Timeout {
                url: locator.to_owned(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

fn clone_snapshot(url: &str, dest: &Path) -> Result<HeadCommit, FetchError> {
    let repo = match shallow_clone(url, dest) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::debug!(url, "shallow clone failed, falling back to full clone: {e}");
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            Repository::clone(url, dest).map_err(|source| FetchError::Clone {
                url: url.to_owned(),
                source,
            })?
        }
    };
    head_commit(&repo)
}

fn shallow_clone(url: &str, dest: &Path) -> Result<Repository, git2::Error> {
    let mut fo = FetchOptions::new();
    fo.depth(1);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    builder.clone(url, dest)
}

/// Read id, message and author of the commit `HEAD` points at.
///
/// # Errors
///
/// Returns `FetchError::Head` if `HEAD` is unborn or does not resolve to a commit.
pub fn head_commit(repo: &Repository) -> Result<HeadCommit, FetchError> {
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|source| FetchError::Head { source })?;
    let author = commit.author();
    let name = author.name().unwrap_or("unknown");
    let email = author.email().unwrap_or("");

    Ok(HeadCommit {
        id: commit.id().to_string(),
        message: commit.message().unwrap_or_default().trim_end().to_owned(),
        author: format!("{name} <{email}>"),
    })
}
