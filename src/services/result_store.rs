use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("File not found")]
    NotFound,

    #[error("Failed to store converted file: {0}")]
    Io(#[from] io::Error),
}

/// A converted PDF that can be downloaded.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: String,
    /// Suggested download name, e.g. `Report.pdf`.
    pub file_name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Age-based eviction: anything created more than `max_age` ago is reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = (now - created_at).to_std().unwrap_or_default();
        age > self.max_age
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Tracked artifacts removed because they expired.
    pub evicted: usize,
    /// Stale files on disk that nothing was tracking.
    pub orphans_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.evicted + self.orphans_removed
    }
}

struct Entry {
    artifact: StoredArtifact,
    lease: Arc<()>,
}

impl Entry {
    fn is_leased(&self) -> bool {
        Arc::strong_count(&self.lease) > 1
    }
}

/// Keeps an artifact from being evicted while it is alive.
#[derive(Debug)]
pub struct ArtifactLease {
    artifact: StoredArtifact,
    _lease: Arc<()>,
}

impl ArtifactLease {
    pub fn artifact(&self) -> &StoredArtifact {
        &self.artifact
    }
}

/// Id to file mapping for converted PDFs, shared by every request.
///
/// Entries are only ever inserted with fresh ids and removed by [`cleanup`],
/// never updated in place.
///
/// [`cleanup`]: ResultStore::cleanup
#[derive(Clone)]
pub struct ResultStore {
    dir: PathBuf,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl ResultStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            entries: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Moves the finished PDF at `source` into the store under a fresh random id.
    ///
    /// The artifact is only resolvable once the file is fully in place.
    pub async fn register(&self, source: &Path, file_name: &str) -> Result<StoredArtifact, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{id}.pdf"));

        move_file(source, &path).await?;

        let artifact = StoredArtifact {
            id: id.clone(),
            file_name: file_name.to_string(),
            path,
            created_at: Utc::now(),
        };

        self.write().insert(
            id,
            Entry {
                artifact: artifact.clone(),
                lease: Arc::new(()),
            },
        );

        tracing::debug!(artifact_id = %artifact.id, file_name, "Registered artifact");
        Ok(artifact)
    }

    /// Looks up an artifact and leases it for as long as the returned value lives.
    pub fn resolve(&self, id: &str) -> Result<ArtifactLease, StoreError> {
        let entries = self.read();
        let entry = entries.get(id).ok_or(StoreError::NotFound)?;
        Ok(ArtifactLease {
            artifact: entry.artifact.clone(),
            _lease: Arc::clone(&entry.lease),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Evicts expired, unleased artifacts, then removes stale untracked files
    /// from the store directory. Running it again on a clean store is a no-op.
    pub async fn cleanup(&self, policy: &RetentionPolicy) -> Result<CleanupReport, StoreError> {
        let now = Utc::now();

        // Unregister first so no new download can start on a file being deleted.
        let expired: Vec<StoredArtifact> = {
            let mut entries = self.write();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| !entry.is_leased())
                .filter(|(_, entry)| policy.is_expired(entry.artifact.created_at, now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| entries.remove(id))
                .map(|entry| entry.artifact)
                .collect()
        };

        let mut report = CleanupReport::default();
        for artifact in &expired {
            match remove_if_exists(&artifact.path).await {
                Ok(_) => {
                    report.evicted += 1;
                    tracing::debug!(artifact_id = %artifact.id, "Evicted artifact");
                }
                // Now untracked, so the orphan pass retries it.
                Err(e) => tracing::warn!(
                    artifact_id = %artifact.id,
                    path = %artifact.path.display(),
                    "Failed to remove expired artifact: {e}"
                ),
            }
        }

        let tracked: HashSet<PathBuf> = self
            .read()
            .values()
            .map(|entry| entry.artifact.path.clone())
            .collect();
        report.orphans_removed = remove_stale_entries(&self.dir, policy, |path| tracked.contains(path)).await?;

        Ok(report)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        // Entries are plain data, a panic mid-insert cannot leave them half-written.
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes a file, treating "already gone" as success. Returns whether it existed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deletes direct children of `dir` older than the policy allows, skipping
/// anything `keep` claims. Directories are removed recursively. A child that
/// cannot be removed is logged and left for the next pass.
pub async fn remove_stale_entries(
    dir: &Path,
    policy: &RetentionPolicy,
    keep: impl Fn(&Path) -> bool,
) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if keep(&path) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Raced with another remover.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot stat stale candidate: {e}");
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if !policy.is_stale(modified) {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                removed += 1;
                tracing::debug!(path = %path.display(), "Removed stale file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove stale file: {e}"),
        }
    }

    Ok(removed)
}

/// Rename, falling back to copy + delete when `from` and `to` are on different filesystems.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if tokio::fs::copy(from, to).await.is_err() {
                let _ = tokio::fs::remove_file(to).await;
                return Err(rename_err);
            }
            tokio::fs::remove_file(from).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_pdf(dir: &Path) -> (ResultStore, PathBuf) {
        let store = ResultStore::open(dir.join("artifacts")).await.unwrap();
        let pdf = dir.join("job.pdf");
        tokio::fs::write(&pdf, b"%PDF-1.4\n").await.unwrap();
        (store, pdf)
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pdf) = store_with_pdf(dir.path()).await;

        let artifact = store.register(&pdf, "Report.pdf").await.unwrap();

        assert!(!pdf.exists(), "source must be moved, not copied");
        assert!(artifact.path.starts_with(store.dir()));
        assert_eq!(artifact.file_name, "Report.pdf");

        let lease = store.resolve(&artifact.id).unwrap();
        assert_eq!(lease.artifact().path, artifact.path);
        assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"%PDF-1.4\n");
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).await.unwrap();

        assert!(matches!(store.resolve("does-not-exist"), Err(StoreError::NotFound)));
        assert!(matches!(store.resolve("../../etc/passwd"), Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_ids_are_unique_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("artifacts")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let src = dir.path().join(format!("job-{i}.pdf"));
            tokio::fs::write(&src, b"%PDF-").await.unwrap();
            handles.push(tokio::spawn(async move {
                store.register(&src, "same.pdf").await.unwrap().id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(store.len(), 32);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pdf) = store_with_pdf(dir.path()).await;
        let artifact = store.register(&pdf, "a.pdf").await.unwrap();

        let keep = RetentionPolicy::new(Duration::from_secs(3600));
        assert_eq!(store.cleanup(&keep).await.unwrap(), CleanupReport::default());
        assert!(store.contains(&artifact.id));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let evict = RetentionPolicy::new(Duration::ZERO);
        let report = store.cleanup(&evict).await.unwrap();

        assert_eq!(report.evicted, 1);
        assert!(!artifact.path.exists());
        assert!(matches!(store.resolve(&artifact.id), Err(StoreError::NotFound)));

        // Second pass over a clean store changes nothing.
        assert_eq!(store.cleanup(&evict).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_skips_leased_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pdf) = store_with_pdf(dir.path()).await;
        let artifact = store.register(&pdf, "a.pdf").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let policy = RetentionPolicy::new(Duration::ZERO);
        let lease = store.resolve(&artifact.id).unwrap();
        let report = store.cleanup(&policy).await.unwrap();
        assert_eq!(report.evicted, 0);
        assert!(artifact.path.exists());

        drop(lease);
        let report = store.cleanup(&policy).await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(!artifact.path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pdf) = store_with_pdf(dir.path()).await;
        let artifact = store.register(&pdf, "a.pdf").await.unwrap();
        let orphan = store.dir().join("left-over-from-last-run.pdf");
        tokio::fs::write(&orphan, b"%PDF-").await.unwrap();

        let keep = RetentionPolicy::new(Duration::from_secs(3600));
        assert_eq!(store.cleanup(&keep).await.unwrap().orphans_removed, 0);
        assert!(orphan.exists());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let lease = store.resolve(&artifact.id).unwrap();
        let report = store.cleanup(&RetentionPolicy::new(Duration::ZERO)).await.unwrap();
        assert_eq!(report, CleanupReport { evicted: 0, orphans_removed: 1 });
        assert!(!orphan.exists());
        assert!(lease.artifact().path.exists(), "tracked files are never orphans");
    }

    #[tokio::test]
    async fn test_cleanup_survives_undeletable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("artifacts")).await.unwrap();
        let mut artifacts = Vec::new();
        for name in ["a.pdf", "b.pdf"] {
            let src = dir.path().join(name);
            tokio::fs::write(&src, b"%PDF-").await.unwrap();
            artifacts.push(store.register(&src, name).await.unwrap());
        }

        // A non-empty directory where a file is expected makes remove_file fail.
        let stuck = artifacts[0].path.clone();
        tokio::fs::remove_file(&stuck).await.unwrap();
        tokio::fs::create_dir(&stuck).await.unwrap();
        tokio::fs::write(stuck.join("inner"), b"x").await.unwrap();
        let orphan = store.dir().join("left-over.pdf");
        tokio::fs::write(&orphan, b"%PDF-").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = store.cleanup(&RetentionPolicy::new(Duration::ZERO)).await.unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.orphans_removed, 2, "orphan pass must still run and reclaim the stuck entry");
        assert!(store.is_empty());
        assert!(!artifacts[1].path.exists());
        assert!(!stuck.exists());
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        tokio::fs::write(&path, b"x").await.unwrap();

        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!remove_if_exists(&path).await.unwrap());
    }

    #[test]
    fn test_policy_threshold() {
        let policy = RetentionPolicy::new(Duration::from_secs(3600));
        let now = Utc::now();
        assert!(!policy.is_expired(now - chrono::Duration::minutes(59), now));
        assert!(policy.is_expired(now - chrono::Duration::minutes(61), now));
        assert!(!policy.is_expired(now + chrono::Duration::minutes(1), now));
    }
}
