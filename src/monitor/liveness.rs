use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{CommitId, Dispatcher, RunnerId};

/// Outcome of one probe round
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub alive: Vec<RunnerId>,
    pub unresponsive: Vec<RunnerId>,
    pub evicted: Vec<(RunnerId, Vec<CommitId>)>,
}

/// Periodically pings every registered runner and evicts the ones that stop answering.
pub struct LivenessMonitor {
    dispatcher: Dispatcher,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(dispatcher: Dispatcher, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Run probe rounds until the token is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.probe_all().await;
                }
            }
        }
        tracing::debug!("Liveness monitor stopped");
    }

    /// Probe every runner in the current snapshot concurrently, then apply
    /// the outcomes. One slow runner only costs its own probe timeout.
    pub async fn probe_all(&self) -> ProbeReport {
        let runners = self.dispatcher.runners().await;
        let client = self.dispatcher.client();

        let probes = runners.into_iter().map(|runner| async move {
            let outcome = client.ping(&runner).await;
            (runner, outcome)
        });
        let outcomes = futures::future::join_all(probes).await;

        let mut report = ProbeReport::default();
        for (runner, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    self.dispatcher.record_alive(&runner).await;
                    report.alive.push(runner);
                }
                Err(e) => {
                    tracing::warn!(runner = %runner, error = %e, "Liveness probe failed");
                    match self.dispatcher.runner_failed(&runner).await {
                        Some(requeued) => report.evicted.push((runner, requeued)),
                        None => report.unresponsive.push(runner),
                    }
                }
            }
        }
        report
    }
}
