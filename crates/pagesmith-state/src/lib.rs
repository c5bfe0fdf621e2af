//! pagesmith-state: hosting targets and persistence for pagesmith
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: immutable bundles, an atomically swapped live pointer, and an
//! append-only run log.
//!
//! ## Key Components
//!
//! - `HostingTarget`: the static-hosting API boundary (upload, set live)
//! - `FsHostingTarget`: directory-backed target with atomic repoint
//! - `HttpHostingTarget`: remote target speaking a small JSON/HTTP protocol
//! - `WriterLock`: advisory file lock serializing writers across processes
//! - `RunLog`: append-only record of finished runs

pub mod cas;
mod error;
pub mod fakes;
pub mod fs_target;
pub mod http_target;
mod lock;
pub mod run_log;
pub mod storage_traits;

pub use cas::FsBlobStore;
pub use error::StateError;
pub use fs_target::FsHostingTarget;
pub use http_target::HttpHostingTarget;
pub use lock::WriterLock;
pub use run_log::FsRunLog;
pub use storage_traits::{
    BundleFile, BundleId, BundleManifest, ContentDigest, HostingTarget, LiveRecord, RunLog,
    RunOutcome, RunRecord, StateResult,
};
