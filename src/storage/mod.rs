use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scheduler::CommitId;

/// Durable store for completed test results, one file per commit.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, commit: &CommitId) -> PathBuf {
        self.dir.join(commit.as_str())
    }

    /// Write the payload bytes as-is. Goes through a temp file and a rename
    /// so readers never observe a partially written result.
    pub async fn persist(&self, commit: &CommitId, payload: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(commit);
        let tmp = self.dir.join(format!(".{}.tmp", commit));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(commit = %commit, path = %path.display(), bytes = payload.len(), "Result persisted");
        Ok(path)
    }

    pub async fn load(&self, commit: &CommitId) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(commit)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
