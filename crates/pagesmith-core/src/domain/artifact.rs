//! Build output.

use std::fs;
use std::path::{Path, PathBuf};

use pagesmith_state::{BundleFile, BundleManifest, ContentDigest};
use tempfile::TempDir;

/// Static file tree produced by one build.
///
/// Owns the run's temporary checkout (when there is one); dropping the
/// artifact set deletes it. Never cloned, so it can't be shared across runs.
#[derive(Debug)]
pub struct ArtifactSet {
    root: PathBuf,
    manifest: BundleManifest,
    _workspace: Option<TempDir>,
}

impl ArtifactSet {
    /// Scan `root` and build its manifest.
    ///
    /// Regular files (and symlinks to files) are included; symlinked
    /// directories are skipped. An empty tree is an error.
    pub fn collect(root: impl Into<PathBuf>, workspace: Option<TempDir>) -> std::io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("output directory {} does not exist", root.display()),
            ));
        }

        let mut files = Vec::new();
        collect_files_recursive(&root, &root, &mut files)?;
        if files.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("output directory {} is empty", root.display()),
            ));
        }

        Ok(Self {
            root,
            manifest: BundleManifest::new(files),
            _workspace: workspace,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn file_count(&self) -> usize {
        self.manifest.len()
    }

    pub fn total_size(&self) -> u64 {
        self.manifest.total_size()
    }
}

fn collect_files_recursive(base: &Path, dir: &Path, files: &mut Vec<BundleFile>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files_recursive(base, &path, files)?;
            continue;
        }
        if file_type.is_symlink() && !fs::metadata(&path)?.is_file() {
            continue;
        }

        let data = fs::read(&path)?;
        files.push(BundleFile {
            path: relative_path(base, &path)?,
            digest: ContentDigest::from_bytes(&data),
            size: data.len() as u64,
        });
    }
    Ok(())
}

fn relative_path(base: &Path, path: &Path) -> std::io::Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("non UTF-8 file name: {}", path.display()),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
