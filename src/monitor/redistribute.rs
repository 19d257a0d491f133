use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{Dispatcher, Placement};

/// Periodically retries placement of every pending commit.
pub struct Redistributor {
    dispatcher: Dispatcher,
    interval: Duration,
}

impl Redistributor {
    pub fn new(dispatcher: Dispatcher, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.redistribute_once(&shutdown).await;
                }
            }
        }
        tracing::debug!("Redistributor stopped");
    }

    /// One pass over a snapshot of the pending queue. Returns how many commits
    /// were placed. Commits queued during the pass wait for the next one.
    pub async fn redistribute_once(&self, shutdown: &CancellationToken) -> usize {
        let pending = self.dispatcher.pending_commits().await;
        if pending.is_empty() {
            return 0;
        }
        tracing::debug!(pending = pending.len(), "Redistributing pending commits");

        let mut placed = 0;
        for commit in pending {
            if shutdown.is_cancelled() {
                break;
            }
            match self.dispatcher.place(&commit).await {
                Placement::Assigned(_) => placed += 1,
                Placement::NoRunners => {
                    tracing::debug!("No runners available, skipping the rest of this pass");
                    break;
                }
                _ => {}
            }
        }
        placed
    }
}
