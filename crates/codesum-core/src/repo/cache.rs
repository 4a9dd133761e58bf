use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use super::FetchError;
use super::fetch::{HeadCommit, RepoFetcher};
use super::identifier::repository_id;
use super::record::{SnapshotRecord, SnapshotState, classify};

const RECORD_SUFFIX: &str = ".snapshot.json";

/// Source of the current time, injectable for TTL tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read access to an established snapshot.
///
/// The snapshot cannot be evicted while the lease is alive.
#[derive(Debug)]
pub struct SnapshotLease {
    id: String,
    path: PathBuf,
    record: SnapshotRecord,
    _guard: OwnedRwLockReadGuard<()>,
}

impl SnapshotLease {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn record(&self) -> &SnapshotRecord {
        &self.record
    }

    #[must_use]
    pub fn head(&self) -> &HeadCommit {
        &self.record.head
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }
}

/// Per-identifier synchronization.
///
/// `gate` serializes the fetch/evict decision. `readers` is held shared by every lease;
/// eviction takes it exclusively, so it waits for outstanding leases.
#[derive(Default)]
struct Slot {
    gate: tokio::sync::Mutex<()>,
    readers: Arc<RwLock<()>>,
}

/// Keeps at most one snapshot per repository identifier under `root`.
///
/// Requests for the same identifier serialize on fetch and eviction; readers of an
/// established snapshot proceed concurrently.
pub struct RepoCache<F, C = SystemClock> {
    root: PathBuf,
    ttl: Duration,
    fetcher: F,
    clock: C,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<F: RepoFetcher> RepoCache<F> {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, fetcher: F) -> Self {
        Self {
            root: root.into(),
            ttl,
            fetcher,
            clock: SystemClock,
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<F: RepoFetcher, C: Clock> RepoCache<F, C> {
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> RepoCache<F, C2> {
        RepoCache {
            root: self.root,
            ttl: self.ttl,
            fetcher: self.fetcher,
            clock,
            slots: self.slots,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return a lease on a fresh snapshot of `url`, fetching it first when it is missing
    /// and evicting it first when it is stale.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidLocator` before touching the disk if no identifier can
    /// be derived from `url`, `FetchError::Evict` if a stale snapshot cannot be removed,
    /// and the fetcher's error if retrieval fails.
    pub async fn acquire(&self, url: &str) -> Result<SnapshotLease, FetchError> {
        let id = repository_id(url)?;
        let slot = self.slot(&id);

        {
            let guard = Arc::clone(&slot.readers).read_owned().await;
            if let (SnapshotState::Fresh, Some(record)) = self.inspect(&id, url).await {
                tracing::info!(repo = %id, created_at = %record.created_at, "snapshot fresh");
                return Ok(self.lease(id, record, guard));
            }
        }

        let _gate = slot.gate.lock().await;
        let (state, record) = self.inspect(&id, url).await;
        if let (SnapshotState::Fresh, Some(record)) = (state, record) {
            tracing::info!(repo = %id, "snapshot fetched by a concurrent request");
            let guard = Arc::clone(&slot.readers).read_owned().await;
            return Ok(self.lease(id, record, guard));
        }

        if state == SnapshotState::Stale {
            tracing::info!(repo = %id, "snapshot stale, waiting for readers before eviction");
        } else {
            tracing::info!(repo = %id, "snapshot missing");
        }
        let writer = Arc::clone(&slot.readers).write_owned().await;
        self.evict(&id).await?;
        let record = self.fetch(&id, url).await?;
        Ok(self.lease(id, record, writer.downgrade()))
    }

    /// Evict every expired, orphaned or half-written snapshot under the root.
    ///
    /// Returns the number of identifiers removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed or a snapshot cannot be removed.
    pub async fn prune(&self) -> Result<usize, FetchError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = match name.strip_suffix(RECORD_SUFFIX) {
                Some(id) => id.to_owned(),
                None if entry.file_type().await?.is_dir() && names_snapshot(&name) => name,
                None => continue,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort();

        let mut removed = 0;
        for id in ids {
            let slot = self.slot(&id);
            let _gate = slot.gate.lock().await;
            let _writer = Arc::clone(&slot.readers).write_owned().await;
            let record = self.read_record(&id).await;
            let url = record.as_ref().map_or("", |r| r.url.as_str()).to_owned();
            let (state, _) = self.inspect(&id, &url).await;
            if state != SnapshotState::Fresh {
                self.evict(&id).await?;
                tracing::info!(repo = %id, ?state, "pruned snapshot");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn slot(&self, id: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.to_owned()).or_default())
    }

    fn lease(
        &self,
        id: String,
        record: SnapshotRecord,
        guard: OwnedRwLockReadGuard<()>,
    ) -> SnapshotLease {
        SnapshotLease {
            path: self.snapshot_dir(&id),
            id,
            record,
            _guard: guard,
        }
    }

    fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}{RECORD_SUFFIX}"))
    }

    async fn inspect(&self, id: &str, url: &str) -> (SnapshotState, Option<SnapshotRecord>) {
        let dir_exists = tokio::fs::metadata(self.snapshot_dir(id))
            .await
            .is_ok_and(|m| m.is_dir());
        let record = self.read_record(id).await;
        let state = classify(record.as_ref(), dir_exists, url, self.clock.now(), self.ttl);
        (state, record)
    }

    async fn read_record(&self, id: &str) -> Option<SnapshotRecord> {
        let path = self.record_path(id);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable snapshot record: {e}");
                None
            }
        }
    }

    async fn evict(&self, id: &str) -> Result<(), FetchError> {
        let dir = self.snapshot_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(repo = %id, path = %dir.display(), "snapshot evicted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(FetchError::Evict { path: dir, source }),
        }
        let record = self.record_path(id);
        match tokio::fs::remove_file(&record).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FetchError::Evict {
                path: record,
                source,
            }),
        }
    }

    async fn fetch(&self, id: &str, url: &str) -> Result<SnapshotRecord, FetchError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let dir = self.snapshot_dir(id);

        tracing::info!(repo = %id, url, "fetching snapshot");
        let head = match self.fetcher.fetch(url, &dir).await {
            Ok(head) => head,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %dir.display(), "failed to remove partial snapshot: {cleanup}");
                }
                return Err(e);
            }
        };

        let record = SnapshotRecord {
            url: url.trim().to_owned(),
            created_at: self.clock.now(),
            head,
        };
        self.write_record(id, &record).await?;
        tracing::info!(repo = %id, commit = %record.head.id, "snapshot ready");
        Ok(record)
    }

    async fn write_record(&self, id: &str, record: &SnapshotRecord) -> Result<(), FetchError> {
        let path = self.record_path(id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| FetchError::Record {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|source| FetchError::Record {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| FetchError::Record { path, source })
    }
}

/// Whether a directory under the cache root could hold a snapshot.
fn names_snapshot(name: &str) -> bool {
    repository_id(name).is_ok()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;

    const URL: &str = "https://github.com/owner/tool";
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(
                Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap(),
            )))
        }

        fn advance_hours(&self, hours: i64) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::hours(hours);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct FakeFetcher {
        calls: Arc<AtomicUsize>,
        fail: bool,
        delay_ms: u64,
    }

    impl RepoFetcher for FakeFetcher {
        async fn fetch(&self, _locator: &str, dest: &Path) -> Result<HeadCommit, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::fs::create_dir_all(dest).await?;
            tokio::fs::write(dest.join("README.md"), format!("fetch {n}")).await?;
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(FetchError::Task("network down".into()));
            }
            Ok(HeadCommit {
                id: format!("{n:040}"),
                message: format!("commit {n}"),
                author: "Ada <ada@example.com>".into(),
            })
        }
    }

    fn cache(
        root: &Path,
        fetcher: FakeFetcher,
        clock: TestClock,
    ) -> RepoCache<FakeFetcher, TestClock> {
        RepoCache::new(root, DAY, fetcher).with_clock(clock)
    }

    #[tokio::test]
    async fn first_request_fetches_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());

        let lease = cache.acquire(URL).await.unwrap();
        assert_eq!(lease.id(), "tool");
        assert_eq!(lease.path(), dir.path().join("tool"));
        assert_eq!(lease.head().message, "commit 1");
        assert!(dir.path().join("tool.snapshot.json").exists());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn snapshot_reused_within_ttl_and_replaced_after() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let clock = TestClock::new();
        let cache = cache(dir.path(), fetcher.clone(), clock.clone());

        let first = cache.acquire(URL).await.unwrap().created_at();

        clock.advance_hours(23);
        let lease = cache.acquire(URL).await.unwrap();
        assert_eq!(lease.created_at(), first);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        drop(lease);

        clock.advance_hours(2);
        let lease = cache.acquire(URL).await.unwrap();
        assert!(lease.created_at() > first);
        assert_eq!(lease.head().message, "commit 2");
        assert_eq!(
            std::fs::read_to_string(lease.path().join("README.md")).unwrap(),
            "fetch 2"
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_locator_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());

        let err = cache.acquire("https://github.com/").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidLocator { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_partial_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher {
            fail: true,
            ..FakeFetcher::default()
        };
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());

        assert!(cache.acquire(URL).await.is_err());
        assert!(!dir.path().join("tool").exists());
        assert!(!dir.path().join("tool.snapshot.json").exists());

        assert!(cache.acquire(URL).await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn orphan_directory_and_corrupt_record_are_refetched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tool")).unwrap();
        std::fs::write(dir.path().join("tool/stale.txt"), "old").unwrap();
        std::fs::write(dir.path().join("tool.snapshot.json"), "{not json").unwrap();

        let fetcher = FakeFetcher::default();
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());
        let lease = cache.acquire(URL).await.unwrap();

        assert!(!lease.path().join("stale.txt").exists());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_url_with_same_name_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());

        drop(cache.acquire(URL).await.unwrap());
        let lease = cache
            .acquire("https://gitlab.com/other/tool.git")
            .await
            .unwrap();
        assert_eq!(lease.record().url, "https://gitlab.com/other/tool.git");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher {
            delay_ms: 50,
            ..FakeFetcher::default()
        };
        let cache = cache(dir.path(), fetcher.clone(), TestClock::new());

        let (a, b) = tokio::join!(cache.acquire(URL), cache.acquire(URL));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.created_at(), b.created_at());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_waits_for_outstanding_leases() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let clock = TestClock::new();
        let cache = cache(dir.path(), fetcher.clone(), clock.clone());

        let lease = cache.acquire(URL).await.unwrap();
        clock.advance_hours(25);

        let blocked = tokio::time::timeout(Duration::from_millis(100), cache.acquire(URL)).await;
        assert!(blocked.is_err(), "eviction must wait for the reader");
        assert!(lease.path().join("README.md").exists());
        drop(lease);

        let lease = cache.acquire(URL).await.unwrap();
        assert_eq!(lease.head().message, "commit 2");
    }

    #[tokio::test]
    async fn prune_removes_only_expired_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let clock = TestClock::new();
        let cache = cache(dir.path(), FakeFetcher::default(), clock.clone());

        drop(cache.acquire("https://github.com/owner/old").await.unwrap());
        clock.advance_hours(20);
        drop(cache.acquire("https://github.com/owner/new").await.unwrap());
        std::fs::create_dir_all(dir.path().join("orphan")).unwrap();
        clock.advance_hours(5);

        assert_eq!(cache.prune().await.unwrap(), 2);
        assert!(!dir.path().join("old").exists());
        assert!(!dir.path().join("old.snapshot.json").exists());
        assert!(!dir.path().join("orphan").exists());
        assert!(dir.path().join("new").exists());
    }

    #[tokio::test]
    async fn prune_removes_orphans_with_leading_dot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), FakeFetcher::default(), TestClock::new());

        drop(cache.acquire("https://github.com/owner/.dotfiles").await.unwrap());
        assert!(dir.path().join(".dotfiles").exists());
        std::fs::remove_file(dir.path().join(".dotfiles.snapshot.json")).unwrap();
        std::fs::create_dir_all(dir.path().join("not a repo")).unwrap();

        assert_eq!(cache.prune().await.unwrap(), 1);
        assert!(!dir.path().join(".dotfiles").exists());
        assert!(dir.path().join("not a repo").exists());
    }

    #[test]
    fn snapshot_names_follow_identifier_rules() {
        assert!(names_snapshot("tool"));
        assert!(names_snapshot(".dotfiles"));
        assert!(!names_snapshot(".."));
        assert!(!names_snapshot("not a repo"));
    }

    #[tokio::test]
    async fn prune_of_missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(
            &dir.path().join("absent"),
            FakeFetcher::default(),
            TestClock::new(),
        );
        assert_eq!(cache.prune().await.unwrap(), 0);
    }
}
