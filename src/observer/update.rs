use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{DispatchError, Result};
use crate::scheduler::CommitId;

/// Runs the external repository update step.
///
/// The script is invoked as `<script> <repo>`. It refreshes the repository
/// and, when a commit newer than the last one seen exists, writes that commit
/// id to the commit file. A non-zero exit is a hard failure.
#[derive(Debug, Clone)]
pub struct RepoUpdater {
    script: PathBuf,
    commit_file: PathBuf,
}

impl RepoUpdater {
    pub fn new(script: impl Into<PathBuf>, commit_file: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            commit_file: commit_file.into(),
        }
    }

    /// Run the update script and return the new commit, if it reported one.
    pub async fn update(&self, repo: &Path) -> Result<Option<CommitId>> {
        tracing::debug!(script = %self.script.display(), repo = %repo.display(), "Updating repository");

        let output = Command::new(&self.script)
            .arg(repo)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                DispatchError::UpdateFailed(format!(
                    "could not run {}: {}",
                    self.script.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DispatchError::UpdateFailed(if stderr.is_empty() {
                format!("exit code: {:?}", output.status.code())
            } else {
                stderr
            }));
        }

        self.read_commit().await
    }

    async fn read_commit(&self) -> Result<Option<CommitId>> {
        let contents = match tokio::fs::read_to_string(&self.commit_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let line = contents.lines().next().unwrap_or_default();
        match CommitId::parse(line) {
            Some(commit) => Ok(Some(commit)),
            None => {
                tracing::warn!(
                    file = %self.commit_file.display(),
                    line,
                    "Commit file does not hold a usable commit id"
                );
                Ok(None)
            }
        }
    }
}
