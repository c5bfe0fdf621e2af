//! Advisory file locks shared by every process writing to one target.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::storage_traits::StateResult;

/// Exclusive advisory lock on a file; released on drop.
///
/// Locks are taken per open file, so two handles in the same process
/// exclude each other just like two processes do.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Block until the lock on `path` is held, creating the file if needed.
    pub fn acquire(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        debug!(lock = %path.display(), "writer lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
