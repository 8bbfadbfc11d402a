//! Filesystem storage for synthesized audio.
//!
//! The store hands out unique artifact paths inside a scratch directory and
//! performs the actual file I/O. It never decides *when* an artifact goes
//! away; that is up to [`AudioCache`](crate::cache::AudioCache).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;

/// File name prefix of every artifact the store creates.
pub const ARTIFACT_PREFIX: &str = "tts-";
/// Extension of every artifact the store creates.
pub const ARTIFACT_EXTENSION: &str = "wav";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact {} is missing", .0.display())]
    Missing(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::Missing(path.to_path_buf())
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) the scratch directory.
    ///
    /// Artifacts left behind by a previous process are deleted: the cache
    /// always starts empty, so nothing could reference them.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::from_io(&root, e))?;

        let store = Self { root };
        let purged = store.purge_stale()?;
        if purged > 0 {
            info!("Removed {} stale artifact(s) from {}", purged, store.root.display());
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh, unique path for the artifact of `fingerprint`.
    ///
    /// Concurrent misses for the same fingerprint get distinct paths.
    pub fn reserve(&self, fingerprint: &Fingerprint) -> PendingArtifact {
        let name = format!(
            "{ARTIFACT_PREFIX}{fingerprint}-{}.{ARTIFACT_EXTENSION}",
            uuid::Uuid::new_v4().simple()
        );
        PendingArtifact {
            path: self.root.join(name),
            committed: false,
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Size in bytes, `None` if the artifact cannot be inspected.
    pub fn size(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().map(|m| m.len())
    }

    /// Delete an artifact. Returns `Ok(false)` when it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    /// Read a whole artifact into memory.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))
    }

    fn purge_stale(&self) -> Result<usize, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::from_io(&self.root, e))?;

        let mut purged = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_artifact_name(&path) {
                continue;
            }
            match self.remove(&path) {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => warn!("Could not remove stale artifact: {e}"),
            }
        }
        Ok(purged)
    }
}

fn is_artifact_name(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(ARTIFACT_PREFIX));
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == ARTIFACT_EXTENSION);
    name_ok && ext_ok && path.is_file()
}

/// An artifact path being written by a synthesis that has not finished yet.
///
/// Dropping it deletes whatever was written; [`commit`](Self::commit) hands
/// the path over to the caller (normally straight into the cache).
#[derive(Debug)]
pub struct PendingArtifact {
    path: PathBuf,
    committed: bool,
}

impl PendingArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Discarded unfinished artifact {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to discard unfinished artifact {}: {e}",
                self.path.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u128) -> Fingerprint {
        Fingerprint::from(n)
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("artifacts");
        let store = ArtifactStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
    }

    #[test]
    fn test_open_purges_only_stale_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("tts-0000-old.wav");
        let unrelated = dir.path().join("notes.txt");
        fs::write(&stale, b"RIFF").unwrap();
        fs::write(&unrelated, b"keep me").unwrap();

        ArtifactStore::open(dir.path()).unwrap();

        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_reserve_gives_unique_paths_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let a = store.reserve(&fp(7));
        let b = store.reserve(&fp(7));
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains(&fp(7).to_string()));
    }

    #[test]
    fn test_dropped_pending_artifact_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let pending = store.reserve(&fp(1));
        let path = pending.path().to_path_buf();
        fs::write(&path, b"partial").unwrap();

        drop(pending);
        assert!(!path.exists());
    }

    #[test]
    fn test_committed_artifact_survives() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let pending = store.reserve(&fp(2));
        fs::write(pending.path(), b"audio").unwrap();

        let path = pending.commit();
        assert!(store.exists(&path));
        assert_eq!(store.size(&path), Some(5));
    }

    #[test]
    fn test_remove_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let path = dir.path().join("tts-gone.wav");
        fs::write(&path, b"x").unwrap();

        assert!(store.remove(&path).unwrap());
        assert!(!store.remove(&path).unwrap());
        assert_eq!(store.size(&path), None);
    }

    #[tokio::test]
    async fn test_read_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let path = dir.path().join("tts-missing.wav");

        match store.read(&path).await {
            Err(StorageError::Missing(p)) => assert_eq!(p, path),
            other => panic!("expected Missing, got {other:?}"),
        }
    }
}
