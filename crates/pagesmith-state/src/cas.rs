//! Content-addressed blob storage for bundle files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::StateError;
use crate::storage_traits::{ContentDigest, StateResult};

/// Filesystem-backed blob store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    objects_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a new store rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StateResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    /// On-disk location of a blob (whether or not it exists).
    pub fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        let hex = digest.as_str();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Store `data` and return its digest. Deduplicates automatically.
    pub fn put(&self, data: &[u8]) -> StateResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            return Ok(digest);
        }

        let shard_dir = self.objects_dir.join(&digest.as_str()[..2]);
        fs::create_dir_all(&shard_dir)?;

        // Temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(digest)
    }

    /// Store `data` only if it hashes to `expected`.
    pub fn put_verified(&self, data: &[u8], expected: &ContentDigest) -> StateResult<()> {
        let actual = ContentDigest::from_bytes(data);
        if &actual != expected {
            return Err(StateError::Corrupt(format!(
                "digest mismatch: expected {}, got {}",
                expected.short(),
                actual.short()
            )));
        }
        self.put(data)?;
        Ok(())
    }

    /// Retrieve the blob for `digest`.
    pub fn get(&self, digest: &ContentDigest) -> StateResult<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(format!("blob {}", digest.short()))
            } else {
                StateError::Io(e)
            }
        })
    }

    /// Check whether `digest` exists without reading the blob.
    pub fn exists(&self, digest: &ContentDigest) -> bool {
        self.blob_path(digest).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn blob_roundtrip() {
        let (_dir, store) = make_store();
        let digest = store.put(b"<html></html>").unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"<html></html>");
    }

    #[test]
    fn dedupe_invariant() {
        let (dir, store) = make_store();
        let d1 = store.put(b"duplicate me").unwrap();
        let d2 = store.put(b"duplicate me").unwrap();
        assert_eq!(d1, d2);

        let hex = d1.as_str();
        let shard = dir.path().join("objects").join(&hex[..2]);
        let entries: Vec<_> = std::fs::read_dir(shard).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn put_verified_rejects_mismatch() {
        let (_dir, store) = make_store();
        let wrong = ContentDigest::from_bytes(b"something else");
        match store.put_verified(b"actual bytes", &wrong) {
            Err(StateError::Corrupt(msg)) => assert!(msg.contains("digest mismatch")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
        assert!(!store.exists(&ContentDigest::from_bytes(b"actual bytes")));
    }

    #[test]
    fn get_nonexistent_returns_not_found() {
        let (_dir, store) = make_store();
        let fake = ContentDigest::from_bytes(b"no such blob");
        assert!(matches!(store.get(&fake), Err(StateError::NotFound(_))));
        assert!(!store.exists(&fake));
    }
}
