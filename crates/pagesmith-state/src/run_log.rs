//! JSON-lines run log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::storage_traits::{RunLog, RunRecord, StateResult};

const RUN_LOG_FILE: &str = "runs.jsonl";

/// Append-only run log stored as `<dir>/runs.jsonl`.
#[derive(Debug, Clone)]
pub struct FsRunLog {
    path: PathBuf,
}

impl FsRunLog {
    pub fn new(dir: impl AsRef<Path>) -> StateResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(RUN_LOG_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RunLog for FsRunLog {
    async fn append(&self, record: &RunRecord) -> StateResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    async fn list(&self) -> StateResult<Vec<RunRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<RunRecord>, _>>()?;
        records.reverse();
        Ok(records)
    }
}
