//! Storage traits for pagesmith
//!
//! Defines the persistence boundaries:
//! - `HostingTarget`: static hosting API (upload bundle, set live, history)
//! - `RunLog`: append-only record of finished runs
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StateError;
use crate::lock::WriterLock;

/// Result type for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StateError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StateError::InvalidDigest(s));
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

/// One regular file inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// Path relative to the bundle root, `/`-separated.
    pub path: String,
    /// SHA-256 of the file content.
    pub digest: ContentDigest,
    /// Size in bytes.
    pub size: u64,
}

/// Sorted file listing of an artifact directory.
///
/// The manifest is the identity of a bundle: identical trees produce the
/// same manifest and therefore the same [`BundleId`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BundleManifest {
    pub files: Vec<BundleFile>,
}

impl BundleManifest {
    /// Build a manifest, sorting entries by path.
    pub fn new(mut files: Vec<BundleFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Deterministic bundle identity: digest of the canonical JSON encoding.
    pub fn bundle_id(&self) -> StateResult<BundleId> {
        let bytes = serde_json::to_vec(self)?;
        Ok(BundleId(ContentDigest::from_bytes(&bytes)))
    }

    /// Reject empty manifests and paths that would escape the bundle root.
    pub fn validate(&self) -> StateResult<()> {
        if self.files.is_empty() {
            return Err(StateError::Corrupt("bundle manifest is empty".to_string()));
        }
        for file in &self.files {
            let p = &file.path;
            if p.is_empty()
                || p.starts_with('/')
                || p.contains('\\')
                || p.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
            {
                return Err(StateError::Corrupt(format!("illegal bundle path: {p:?}")));
            }
        }
        Ok(())
    }
}

/// Identifier of an uploaded, immutable bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub ContentDigest);

impl BundleId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn short(&self) -> &str {
        self.0.short()
    }
}

impl TryFrom<String> for BundleId {
    type Error = StateError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        ContentDigest::try_from(s).map(BundleId)
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single activation of a bundle in the live slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRecord {
    pub bundle_id: BundleId,
    /// Public URL serving the bundle.
    pub url: String,
    pub activated_at: DateTime<Utc>,
    /// Free-form provenance (commit, run id, "rollback").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// HostingTarget: static hosting API boundary
// ---------------------------------------------------------------------------

/// Static hosting target holding exactly one live bundle.
///
/// Semantics:
/// - `upload_bundle` stores an immutable bundle. Uploading the same content
///   twice returns the same id. Never touches the live slot.
/// - `set_live` repoints the live slot in one atomic step. On error the
///   previously live bundle is still served.
/// - `history` is append-only, newest first. Re-activating an old bundle
///   appends a new record.
/// - `lock_writer` returns a lock shared with every other process writing to
///   the same target, or `None` when the backend serializes writers itself.
#[async_trait]
pub trait HostingTarget: Send + Sync {
    /// Upload the files listed in `manifest`, read from `source`.
    async fn upload_bundle(&self, manifest: &BundleManifest, source: &Path)
        -> StateResult<BundleId>;

    /// Make `bundle` the live bundle and return its public URL.
    async fn set_live(&self, bundle: &BundleId, note: Option<String>) -> StateResult<String>;

    /// The currently live record, if anything was ever published.
    async fn live(&self) -> StateResult<Option<LiveRecord>>;

    /// Every activation, newest first.
    async fn history(&self) -> StateResult<Vec<LiveRecord>>;

    /// Wait for the cross-process writer lock, if this backend has one.
    async fn lock_writer(&self) -> StateResult<Option<WriterLock>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// RunLog: finished run records
// ---------------------------------------------------------------------------

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Persisted form of a terminated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub trigger: String,
    pub commit_ref: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_sha: Option<String>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Append-only log of finished runs.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Append one terminal run.
    async fn append(&self, record: &RunRecord) -> StateResult<()>;

    /// All records, newest first.
    async fn list(&self) -> StateResult<Vec<RunRecord>>;
}
