//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryHostingTarget` and `MemoryRunLog` that satisfy the trait
//! contracts without touching the network. `MemoryHostingTarget` can inject
//! upload and set-live failures, drop history appends, and records how many
//! writers overlapped.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StateError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryHostingTarget
// ---------------------------------------------------------------------------

const MEMORY_URL: &str = "memory://live/";

/// In-memory hosting target: bundles are `path -> bytes` maps.
#[derive(Debug, Default)]
pub struct MemoryHostingTarget {
    bundles: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    live: Mutex<Option<LiveRecord>>,
    history: Mutex<Vec<LiveRecord>>,
    skip_history: AtomicBool,
    fail_upload: AtomicBool,
    fail_set_live: AtomicBool,
    upload_delay: Duration,
    uploads: AtomicUsize,
    writers: AtomicUsize,
    max_writers: AtomicUsize,
}

struct WriterGuard<'a>(&'a AtomicUsize);

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryHostingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every upload for `delay`, widening the window in which
    /// overlapping writers would be observed.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Make every subsequent upload fail with a transport error.
    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set_live` fail with an authorization error.
    pub fn set_fail_set_live(&self, fail: bool) {
        self.fail_set_live.store(fail, Ordering::SeqCst);
    }

    /// Repoint without appending to history, like a target whose history
    /// write failed after the pointer moved.
    pub fn set_skip_history(&self, skip: bool) {
        self.skip_history.store(skip, Ordering::SeqCst);
    }

    /// Number of `upload_bundle` calls that reached the target.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Highest number of uploads observed in flight at once.
    pub fn max_concurrent_writers(&self) -> usize {
        self.max_writers.load(Ordering::SeqCst)
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.lock().unwrap().len()
    }

    /// Files served by the live bundle.
    pub fn live_content(&self) -> Option<BTreeMap<String, Vec<u8>>> {
        let live = self.live.lock().unwrap().clone()?;
        self.bundles
            .lock()
            .unwrap()
            .get(live.bundle_id.as_str())
            .cloned()
    }

    fn enter_writer(&self) -> WriterGuard<'_> {
        let now = self.writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writers.fetch_max(now, Ordering::SeqCst);
        WriterGuard(&self.writers)
    }
}

#[async_trait]
impl HostingTarget for MemoryHostingTarget {
    async fn upload_bundle(
        &self,
        manifest: &BundleManifest,
        source: &Path,
    ) -> StateResult<BundleId> {
        let _writer = self.enter_writer();
        self.uploads.fetch_add(1, Ordering::SeqCst);

        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(StateError::Transport("injected upload failure".to_string()));
        }
        manifest.validate()?;

        let mut files = BTreeMap::new();
        for file in &manifest.files {
            let data = std::fs::read(source.join(&file.path))?;
            if ContentDigest::from_bytes(&data) != file.digest {
                return Err(StateError::Corrupt(format!("digest mismatch for {}", file.path)));
            }
            files.insert(file.path.clone(), data);
        }

        let bundle = manifest.bundle_id()?;
        self.bundles
            .lock()
            .unwrap()
            .insert(bundle.as_str().to_string(), files);
        Ok(bundle)
    }

    async fn set_live(&self, bundle: &BundleId, note: Option<String>) -> StateResult<String> {
        if self.fail_set_live.load(Ordering::SeqCst) {
            return Err(StateError::Unauthorized(
                "injected set_live failure".to_string(),
            ));
        }
        if !self.bundles.lock().unwrap().contains_key(bundle.as_str()) {
            return Err(StateError::NotFound(format!("bundle {}", bundle.short())));
        }
        let record = LiveRecord {
            bundle_id: bundle.clone(),
            url: MEMORY_URL.to_string(),
            activated_at: Utc::now(),
            note,
        };
        *self.live.lock().unwrap() = Some(record.clone());
        if !self.skip_history.load(Ordering::SeqCst) {
            self.history.lock().unwrap().push(record);
        }
        Ok(MEMORY_URL.to_string())
    }

    async fn live(&self) -> StateResult<Option<LiveRecord>> {
        Ok(self.live.lock().unwrap().clone())
    }

    async fn history(&self) -> StateResult<Vec<LiveRecord>> {
        let mut history = self.history.lock().unwrap().clone();
        history.reverse(); // newest first
        Ok(history)
    }
}

// ---------------------------------------------------------------------------
// MemoryRunLog
// ---------------------------------------------------------------------------

/// In-memory run log backed by a `Vec<RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunLog {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn append(&self, record: &RunRecord) -> StateResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn list(&self) -> StateResult<Vec<RunRecord>> {
        let mut records = self.records.lock().unwrap().clone();
        records.reverse();
        Ok(records)
    }
}
