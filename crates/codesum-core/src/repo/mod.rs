//! On-disk repository snapshots with TTL-based invalidation.

mod cache;
mod fetch;
mod identifier;
mod record;

pub use cache::{Clock, RepoCache, SnapshotLease, SystemClock};
pub use fetch::{GitFetcher, HeadCommit, RepoFetcher, head_commit};
pub use identifier::repository_id;
pub use record::{SnapshotRecord, SnapshotState, classify};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid repository locator {locator:?}: {reason}")]
    InvalidLocator {
        locator: String,
        reason: &'static str,
    },

    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to resolve HEAD commit: {source}")]
    Head {
        #[source]
        source: git2::Error,
    },

    #[error("fetching {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("failed to evict snapshot {}: {source}", path.display())]
    Evict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write snapshot record {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
