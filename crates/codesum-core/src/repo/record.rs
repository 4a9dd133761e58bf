use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fetch::HeadCommit;

/// Sidecar metadata stored next to each snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub head: HeadCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Nothing on disk; fetch.
    Missing,
    /// Usable as is.
    Fresh,
    /// On disk but expired, orphaned or for another URL; evict then fetch.
    Stale,
}

/// Decide what to do with the snapshot of one identifier.
///
/// A snapshot is stale when its directory has no record, when the record was written
/// for a different URL, or when it is strictly older than `ttl`. A record whose
/// directory is gone counts as missing.
#[must_use]
pub fn classify(
    record: Option<&SnapshotRecord>,
    dir_exists: bool,
    url: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> SnapshotState {
    if !dir_exists {
        return SnapshotState::Missing;
    }
    let Some(record) = record else {
        return SnapshotState::Stale;
    };
    if record.url.trim() != url.trim() {
        return SnapshotState::Stale;
    }
    // A creation time in the future (clock skew) converts to an error and stays fresh.
    match (now - record.created_at).to_std() {
        Ok(age) if age > ttl => SnapshotState::Stale,
        _ => SnapshotState::Fresh,
    }
}
