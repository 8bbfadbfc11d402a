//! Bounded in-memory index of synthesized audio.
//!
//! [`AudioCache`] maps a [`Fingerprint`] to the artifact that was synthesized
//! for it. The mapping holds at most `capacity` entries; inserting past that
//! evicts the entries with the oldest `created_at` and deletes their files.
//!
//! Only the mapping is touched under the lock. Artifact files are deleted
//! after the lock is released, once their entries are already detached, so a
//! slow filesystem never stalls unrelated requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::store::ArtifactStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Per-entry view reported by [`AudioCache::status`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub count: usize,
    pub capacity: usize,
    pub entries: Vec<EntryStatus>,
}

/// Outcome of [`AudioCache::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Entries dropped from the mapping.
    pub removed: usize,
    /// Artifacts that could not be deleted.
    pub failed: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    last_created: Option<DateTime<Utc>>,
}

impl CacheState {
    /// Current time, nudged forward so consecutive inserts never tie.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_created = Some(created_at);
        created_at
    }

    /// Detach entries, oldest first, until at most `capacity` remain.
    /// Ties on `created_at` fall back to fingerprint order.
    fn take_excess(&mut self, capacity: usize) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let Some(oldest) = self
                .entries
                .values()
                .min_by_key(|e| (e.created_at, e.fingerprint))
                .map(|e| e.fingerprint)
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                evicted.push(entry);
            }
        }
        evicted
    }
}

#[derive(Debug)]
pub struct AudioCache {
    capacity: usize,
    store: Arc<ArtifactStore>,
    state: Mutex<CacheState>,
}

impl AudioCache {
    /// A capacity of zero is raised to one: the artifact just synthesized
    /// must survive its own insert.
    pub fn new(capacity: usize, store: Arc<ArtifactStore>) -> Self {
        Self {
            capacity: capacity.max(1),
            store,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Path of the artifact cached for `fingerprint`.
    ///
    /// An entry whose file has disappeared is purged and reported as absent.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let path = self.state().entries.get(fingerprint)?.artifact_path.clone();
        if self.store.exists(&path) {
            return Some(path);
        }

        if self.invalidate(fingerprint, &path) {
            warn!(
                "Cached artifact for {} vanished ({}), entry purged",
                fingerprint,
                path.display()
            );
        }
        None
    }

    /// Add or overwrite the entry for `fingerprint`, then evict down to
    /// capacity. Returns the fingerprints that were evicted.
    pub fn insert(&self, fingerprint: Fingerprint, artifact_path: PathBuf) -> Vec<Fingerprint> {
        self.insert_entry(fingerprint, artifact_path, None)
    }

    /// Like [`insert`](Self::insert) with an explicit creation time.
    pub fn insert_at(
        &self,
        fingerprint: Fingerprint,
        artifact_path: PathBuf,
        created_at: DateTime<Utc>,
    ) -> Vec<Fingerprint> {
        self.insert_entry(fingerprint, artifact_path, Some(created_at))
    }

    fn insert_entry(
        &self,
        fingerprint: Fingerprint,
        artifact_path: PathBuf,
        created_at: Option<DateTime<Utc>>,
    ) -> Vec<Fingerprint> {
        let (superseded, evicted) = {
            let mut state = self.state();
            let created_at = match created_at {
                Some(at) => {
                    state.last_created = state.last_created.max(Some(at));
                    at
                }
                None => state.next_created_at(),
            };

            let previous = state.entries.insert(
                fingerprint,
                CacheEntry {
                    fingerprint,
                    artifact_path: artifact_path.clone(),
                    created_at,
                },
            );
            let superseded = previous
                .map(|old| old.artifact_path)
                .filter(|old| *old != artifact_path);

            (superseded, state.take_excess(self.capacity))
        };

        if let Some(path) = superseded {
            debug!("Artifact for {} replaced, deleting {}", fingerprint, path.display());
            self.delete_artifact(&path);
        }
        self.delete_evicted(evicted)
    }

    /// Evict oldest entries until the cache is within capacity.
    pub fn evict_excess(&self) -> Vec<Fingerprint> {
        let evicted = self.state().take_excess(self.capacity);
        self.delete_evicted(evicted)
    }

    /// Drop the entry for `fingerprint` if it still points at `artifact_path`.
    ///
    /// Returns whether an entry was removed. A newer artifact inserted for the
    /// same fingerprint in the meantime is left alone.
    pub fn invalidate(&self, fingerprint: &Fingerprint, artifact_path: &Path) -> bool {
        let mut state = self.state();
        let matches = state
            .entries
            .get(fingerprint)
            .is_some_and(|e| e.artifact_path == artifact_path);
        if matches {
            state.entries.remove(fingerprint);
        }
        matches
    }

    /// Remove every entry and delete every artifact.
    pub fn clear(&self) -> ClearReport {
        let drained: Vec<CacheEntry> = self.state().entries.drain().map(|(_, e)| e).collect();

        let mut report = ClearReport {
            removed: drained.len(),
            failed: 0,
        };
        for entry in &drained {
            if let Err(e) = self.store.remove(&entry.artifact_path) {
                warn!("Failed to delete artifact for {}: {e}", entry.fingerprint);
                report.failed += 1;
            }
        }

        info!(
            "Cache cleared: {} entries removed, {} deletion failure(s)",
            report.removed, report.failed
        );
        report
    }

    /// Snapshot of the cache, oldest entry first.
    pub fn status(&self) -> CacheStatus {
        let mut entries: Vec<CacheEntry> = self.state().entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.created_at, e.fingerprint));

        CacheStatus {
            count: entries.len(),
            capacity: self.capacity,
            entries: entries
                .into_iter()
                .map(|e| EntryStatus {
                    size: self.store.size(&e.artifact_path).unwrap_or(0),
                    fingerprint: e.fingerprint,
                    created_at: e.created_at,
                })
                .collect(),
        }
    }

    fn delete_evicted(&self, evicted: Vec<CacheEntry>) -> Vec<Fingerprint> {
        if evicted.is_empty() {
            return Vec::new();
        }
        for entry in &evicted {
            self.delete_artifact(&entry.artifact_path);
        }
        info!("Evicted {} cache entr(ies) over capacity {}", evicted.len(), self.capacity);
        evicted.into_iter().map(|e| e.fingerprint).collect()
    }

    fn delete_artifact(&self, path: &Path) {
        match self.store.remove(path) {
            Ok(true) => debug!("Deleted artifact {}", path.display()),
            Ok(false) => debug!("Artifact {} already gone", path.display()),
            Err(e) => warn!("Failed to delete artifact: {e}"),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // Every critical section leaves the mapping consistent, so a panic
        // elsewhere does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn setup(capacity: usize) -> (TempDir, AudioCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        (dir, AudioCache::new(capacity, store))
    }

    fn artifact(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(format!("tts-{name}.wav"));
        fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fp(n: u128) -> Fingerprint {
        Fingerprint::from(n)
    }

    #[test]
    fn test_insert_then_lookup() {
        let (dir, cache) = setup(4);
        let path = artifact(&dir, "a");
        assert!(cache.insert(fp(1), path.clone()).is_empty());
        assert_eq!(cache.lookup(&fp(1)), Some(path));
        assert_eq!(cache.lookup(&fp(2)), None);
    }

    #[test]
    fn test_capacity_two_evicts_oldest() {
        let (dir, cache) = setup(2);
        let a = artifact(&dir, "a");
        let b = artifact(&dir, "b");
        let c = artifact(&dir, "c");

        cache.insert_at(fp(0xA), a.clone(), at(0));
        cache.insert_at(fp(0xB), b.clone(), at(1));
        let evicted = cache.insert_at(fp(0xC), c.clone(), at(2));

        assert_eq!(evicted, vec![fp(0xA)]);
        assert_eq!(cache.lookup(&fp(0xA)), None);
        assert_eq!(cache.lookup(&fp(0xB)), Some(b));
        assert_eq!(cache.lookup(&fp(0xC)), Some(c));
        assert!(!a.exists());
    }

    #[test]
    fn test_eviction_follows_created_at_not_insert_order() {
        let (dir, cache) = setup(2);
        cache.insert_at(fp(1), artifact(&dir, "1"), at(40));
        cache.insert_at(fp(2), artifact(&dir, "2"), at(10));
        assert_eq!(cache.insert_at(fp(3), artifact(&dir, "3"), at(30)), vec![fp(2)]);
        // older than everything cached, so it is the one to go
        assert_eq!(cache.insert_at(fp(4), artifact(&dir, "4"), at(0)), vec![fp(4)]);

        let remaining: Vec<Fingerprint> = cache
            .status()
            .entries
            .into_iter()
            .map(|e| e.fingerprint)
            .collect();
        assert_eq!(remaining, vec![fp(3), fp(1)]);
    }

    #[test]
    fn test_eviction_reduces_to_exact_capacity() {
        let (dir, cache) = setup(3);
        for n in 0..10u128 {
            cache.insert(fp(n), artifact(&dir, &format!("e{n}")));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        let kept: Vec<Fingerprint> = cache.status().entries.iter().map(|e| e.fingerprint).collect();
        assert_eq!(kept, vec![fp(7), fp(8), fp(9)]);
        for n in 0..7u128 {
            assert!(!dir.path().join(format!("tts-e{n}.wav")).exists());
        }
    }

    #[test]
    fn test_ties_break_on_fingerprint() {
        let (dir, cache) = setup(1);
        cache.insert_at(fp(9), artifact(&dir, "nine"), at(5));
        let evicted = cache.insert_at(fp(4), artifact(&dir, "four"), at(5));
        assert_eq!(evicted, vec![fp(4)]);
        assert!(cache.lookup(&fp(9)).is_some());
    }

    #[test]
    fn test_rapid_inserts_never_tie() {
        let (dir, cache) = setup(100);
        for n in 0..50u128 {
            cache.insert(fp(n), artifact(&dir, &format!("r{n}")));
        }
        let entries = cache.status().entries;
        for pair in entries.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
        }
    }

    #[test]
    fn test_lookup_purges_entry_when_file_deleted() {
        let (dir, cache) = setup(4);
        let path = artifact(&dir, "gone");
        cache.insert(fp(1), path.clone());

        fs::remove_file(&path).unwrap();

        assert_eq!(cache.lookup(&fp(1)), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_overwrite_keeps_single_entry_and_deletes_old_file() {
        let (dir, cache) = setup(4);
        let first = artifact(&dir, "first");
        let second = artifact(&dir, "second");

        cache.insert(fp(1), first.clone());
        cache.insert(fp(1), second.clone());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&fp(1)), Some(second));
        assert!(!first.exists());
    }

    #[test]
    fn test_reinsert_same_path_keeps_file() {
        let (dir, cache) = setup(4);
        let path = artifact(&dir, "same");
        cache.insert(fp(1), path.clone());
        cache.insert(fp(1), path.clone());
        assert!(path.exists());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_only_matching_path() {
        let (dir, cache) = setup(4);
        let old = dir.path().join("tts-old.wav");
        let new = artifact(&dir, "new");
        cache.insert(fp(1), new.clone());

        assert!(!cache.invalidate(&fp(1), &old));
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&fp(1), &new));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_removes_entries_and_files() {
        let (dir, cache) = setup(4);
        let paths: Vec<PathBuf> = (0..3).map(|n| artifact(&dir, &format!("c{n}"))).collect();
        for (n, path) in paths.iter().enumerate() {
            cache.insert(fp(n as u128), path.clone());
        }
        // one file already gone out of band; not a failure
        fs::remove_file(&paths[0]).unwrap();

        let report = cache.clear();

        assert_eq!(report, ClearReport { removed: 3, failed: 0 });
        assert_eq!(cache.status().count, 0);
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_status_reports_sizes_and_capacity() {
        let (dir, cache) = setup(8);
        cache.insert_at(fp(1), artifact(&dir, "abc"), at(1));
        cache.insert_at(fp(2), artifact(&dir, "defgh"), at(0));

        let status = cache.status();
        assert_eq!(status.count, 2);
        assert_eq!(status.capacity, 8);
        assert_eq!(status.entries[0].fingerprint, fp(2));
        assert_eq!(status.entries[0].size, 5);
        assert_eq!(status.entries[1].size, 3);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (dir, cache) = setup(0);
        assert_eq!(cache.capacity(), 1);
        let path = artifact(&dir, "only");
        cache.insert(fp(1), path.clone());
        assert_eq!(cache.lookup(&fp(1)), Some(path));
    }

    #[test]
    fn test_concurrent_inserts_same_fingerprint() {
        let (dir, cache) = setup(4);
        let paths: Vec<PathBuf> = (0..8).map(|n| artifact(&dir, &format!("dup{n}"))).collect();

        std::thread::scope(|s| {
            for path in &paths {
                let cache = &cache;
                s.spawn(move || {
                    cache.insert(fp(42), path.clone());
                    assert!(cache.len() <= 1);
                });
            }
        });

        assert_eq!(cache.len(), 1);
        let winner = cache.lookup(&fp(42)).expect("one entry survives");
        assert!(paths.contains(&winner));
        assert_eq!(paths.iter().filter(|p| p.exists()).count(), 1);
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let (dir, cache) = setup(3);
        let paths: Vec<PathBuf> = (0..16).map(|n| artifact(&dir, &format!("p{n}"))).collect();

        std::thread::scope(|s| {
            for (n, path) in paths.iter().enumerate() {
                let cache = &cache;
                s.spawn(move || {
                    cache.insert(fp(n as u128), path.clone());
                });
            }
        });

        assert_eq!(cache.len(), 3);
        assert_eq!(paths.iter().filter(|p| p.exists()).count(), 3);
    }
}
