//! Directory-backed hosting target.
//!
//! Layout under `root`:
//!
//! ```text
//! objects/<2>/<62>       content-addressed file blobs
//! bundles/<id>.json      bundle manifests
//! bundles/<id>/...       materialized, immutable bundle trees
//! live.json              pointer to the live bundle (authoritative)
//! history.jsonl          every activation, oldest first
//! current -> bundles/<id> (unix only) symlink for web servers
//! .lock                  writer lock held across a whole upload and repoint
//! .live.lock             held while `live.json` and `current` are swapped
//! ```
//!
//! Both `live.json` and `current` are replaced by rename, so a reader sees
//! either the old bundle or the new one and never a mix of both. The two lock
//! files are `fs2` advisory locks, so separate processes sharing a root are
//! serialized as well.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::cas::FsBlobStore;
use crate::error::StateError;
use crate::lock::WriterLock;
use crate::storage_traits::{
    BundleId, BundleManifest, HostingTarget, LiveRecord, StateResult,
};

const LIVE_FILE: &str = "live.json";
const HISTORY_FILE: &str = "history.jsonl";
const CURRENT_LINK: &str = "current";
const BUNDLES_DIR: &str = "bundles";
const WRITER_LOCK: &str = ".lock";
const POINTER_LOCK: &str = ".live.lock";

/// Hosting target that publishes into a local directory.
#[derive(Debug, Clone)]
pub struct FsHostingTarget {
    root: PathBuf,
    blobs: FsBlobStore,
    public_url: Option<String>,
}

impl FsHostingTarget {
    /// Open (or create) a target rooted at `root`.
    ///
    /// `public_url` is reported by `set_live`; when absent a `file://` URL to
    /// the `current` link is used.
    pub fn new(root: impl AsRef<Path>, public_url: Option<String>) -> StateResult<Self> {
        fs::create_dir_all(root.as_ref().join(BUNDLES_DIR))?;
        let root = root.as_ref().canonicalize()?;
        let blobs = FsBlobStore::new(&root)?;
        Ok(Self {
            root,
            blobs,
            public_url: public_url.filter(|u| !u.is_empty()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the materialized tree of `bundle`.
    pub fn bundle_dir(&self, bundle: &BundleId) -> PathBuf {
        self.root.join(BUNDLES_DIR).join(bundle.as_str())
    }

    fn manifest_path(&self, bundle: &BundleId) -> PathBuf {
        self.root
            .join(BUNDLES_DIR)
            .join(format!("{}.json", bundle.as_str()))
    }

    /// Directory currently served, resolved through `live.json`.
    pub fn live_dir(&self) -> StateResult<Option<PathBuf>> {
        Ok(self
            .read_live_record()?
            .map(|record| self.bundle_dir(&record.bundle_id)))
    }

    /// Load a previously uploaded manifest.
    pub fn manifest(&self, bundle: &BundleId) -> StateResult<BundleManifest> {
        let path = self.manifest_path(bundle);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(format!("bundle {}", bundle.short()))
            } else {
                StateError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn url(&self) -> String {
        match &self.public_url {
            Some(url) => url.clone(),
            None => format!("file://{}/", self.root.join(CURRENT_LINK).display()),
        }
    }

    fn read_live_record(&self) -> StateResult<Option<LiveRecord>> {
        match fs::read(self.root.join(LIVE_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StateResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(name)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Copy blobs into `bundles/<id>/`, staged under a temp name first.
    fn materialize(&self, bundle: &BundleId, manifest: &BundleManifest) -> StateResult<()> {
        let dest = self.bundle_dir(bundle);
        if dest.is_dir() {
            return Ok(());
        }

        let staging = self
            .root
            .join(BUNDLES_DIR)
            .join(format!(".staging-{}", uuid::Uuid::new_v4()));
        let result = (|| -> StateResult<()> {
            for file in &manifest.files {
                let target = staging.join(&file.path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(self.blobs.blob_path(&file.digest), &target)?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if let Err(e) = fs::rename(&staging, &dest) {
            let _ = fs::remove_dir_all(&staging);
            // Lost a race against an identical upload; the tree is the same.
            if !dest.is_dir() {
                return Err(e.into());
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn swap_current_link(&self, bundle: &BundleId) -> StateResult<()> {
        let tmp = self
            .root
            .join(format!(".{}-{}", CURRENT_LINK, uuid::Uuid::new_v4()));
        std::os::unix::fs::symlink(Path::new(BUNDLES_DIR).join(bundle.as_str()), &tmp)?;
        if let Err(e) = fs::rename(&tmp, self.root.join(CURRENT_LINK)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn swap_current_link(&self, _bundle: &BundleId) -> StateResult<()> {
        Ok(())
    }

    fn restore_pointer(&self, previous: Option<&LiveRecord>) {
        let restored = match previous {
            Some(record) => serde_json::to_vec_pretty(record)
                .map_err(StateError::from)
                .and_then(|bytes| self.write_atomic(LIVE_FILE, &bytes)),
            None => fs::remove_file(self.root.join(LIVE_FILE)).map_err(StateError::from),
        };
        if let Err(e) = restored {
            warn!(error = %e, "failed to restore live pointer");
        }
    }

    fn append_history(&self, record: &LiveRecord) -> StateResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(HISTORY_FILE))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl HostingTarget for FsHostingTarget {
    async fn upload_bundle(
        &self,
        manifest: &BundleManifest,
        source: &Path,
    ) -> StateResult<BundleId> {
        manifest.validate()?;

        for file in &manifest.files {
            let data = fs::read(source.join(&file.path))?;
            self.blobs.put_verified(&data, &file.digest)?;
        }

        let bundle = manifest.bundle_id()?;
        if !self.manifest_path(&bundle).exists() {
            let bytes = serde_json::to_vec_pretty(manifest)?;
            let mut tmp = NamedTempFile::new_in(self.root.join(BUNDLES_DIR))?;
            tmp.write_all(&bytes)?;
            tmp.persist(self.manifest_path(&bundle)).map_err(|e| e.error)?;
        }
        self.materialize(&bundle, manifest)?;

        debug!(bundle = %bundle.short(), files = manifest.len(), "bundle uploaded");
        Ok(bundle)
    }

    async fn set_live(&self, bundle: &BundleId, note: Option<String>) -> StateResult<String> {
        if !self.manifest_path(bundle).exists() || !self.bundle_dir(bundle).is_dir() {
            return Err(StateError::NotFound(format!("bundle {}", bundle.short())));
        }

        let _pointer = WriterLock::acquire(&self.root.join(POINTER_LOCK))?;
        let url = self.url();
        let record = LiveRecord {
            bundle_id: bundle.clone(),
            url: url.clone(),
            activated_at: Utc::now(),
            note,
        };

        let previous = self.read_live_record()?;
        self.write_atomic(LIVE_FILE, &serde_json::to_vec_pretty(&record)?)?;

        if let Err(e) = self.swap_current_link(bundle) {
            self.restore_pointer(previous.as_ref());
            return Err(e);
        }

        if let Err(e) = self.append_history(&record) {
            warn!(bundle = %bundle.short(), error = %e, "live history append failed");
        }

        info!(bundle = %bundle.short(), url = %url, "live slot repointed");
        Ok(url)
    }

    async fn live(&self) -> StateResult<Option<LiveRecord>> {
        self.read_live_record()
    }

    async fn history(&self) -> StateResult<Vec<LiveRecord>> {
        let file = match fs::File::open(self.root.join(HISTORY_FILE)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        records.reverse();
        Ok(records)
    }

    async fn lock_writer(&self) -> StateResult<Option<WriterLock>> {
        let path = self.root.join(WRITER_LOCK);
        let lock = tokio::task::spawn_blocking(move || WriterLock::acquire(&path))
            .await
            .map_err(|e| StateError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(Some(lock))
    }
}
