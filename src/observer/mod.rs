//! Repository watcher that tells the dispatcher about new commits.
//!
//! Each poll runs the external update script (see [`RepoUpdater`]); when it
//! reports a new commit the observer checks the dispatcher answers `status`
//! and then sends `dispatch:<commit>`.

pub mod update;

pub use update::RepoUpdater;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ObserverConfig;
use crate::error::{DispatchError, Result};
use crate::protocol::{communicate, Reply, Request};
use crate::scheduler::CommitId;

pub struct RepoObserver {
    config: ObserverConfig,
    updater: RepoUpdater,
}

impl RepoObserver {
    pub fn new(config: ObserverConfig) -> Self {
        let updater = RepoUpdater::new(config.update_script.clone(), config.commit_file.clone());
        Self { config, updater }
    }

    /// Poll until cancelled. A failing update script stops the observer;
    /// an unreachable dispatcher is retried on the next poll.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            repo = %self.config.repo.display(),
            dispatcher = %self.config.dispatcher_addr,
            "Watching repository"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = interval.tick() => match self.poll_once().await {
                    Ok(_) => {}
                    Err(e @ DispatchError::UpdateFailed(_)) => return Err(e),
                    Err(e) if e.is_transport() => {
                        tracing::warn!(error = %e, "Dispatcher unreachable, retrying next poll");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Dispatcher rejected notification, retrying next poll");
                    }
                },
            }
        }
    }

    /// Update the repository once and forward any new commit.
    pub async fn poll_once(&self) -> Result<Option<CommitId>> {
        let Some(commit) = self.updater.update(&self.config.repo).await? else {
            return Ok(None);
        };
        self.notify(&commit).await?;
        Ok(Some(commit))
    }

    async fn notify(&self, commit: &CommitId) -> Result<()> {
        let addr = &self.config.dispatcher_addr;
        let timeout = self.config.request_timeout();

        let status = communicate(addr, &Request::Status.encode(), timeout).await?;
        if status != Reply::Ok.as_str() {
            return Err(DispatchError::UnexpectedReply(status));
        }

        let reply = communicate(addr, &Request::Dispatch(commit.clone()).encode(), timeout).await?;
        if reply == Reply::Ok.as_str() {
            tracing::info!(commit = %commit, "Test dispatched");
        } else if reply == Reply::NoRunners.as_str() {
            tracing::warn!(commit = %commit, "Dispatcher has no runners yet, commit is queued");
        } else {
            return Err(DispatchError::UnexpectedReply(reply));
        }
        Ok(())
    }
}
