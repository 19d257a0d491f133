use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::protocol::RunnerClient;
use crate::scheduler::commit::{CommitId, CommitStatus};
use crate::scheduler::ledger::CommitLedger;
use crate::scheduler::registry::RunnerRegistry;
use crate::scheduler::runner::RunnerId;
use crate::storage::ResultStore;

/// Outcome of one placement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A runner accepted the commit and the assignment was recorded
    Assigned(RunnerId),
    /// No runner is eligible for work
    NoRunners,
    /// Every eligible runner declined or failed; the commit stays pending
    Declined,
    /// The commit is not pending (already assigned, completed, or unknown)
    NotPending,
    /// Another task is placing this commit right now
    InProgress,
}

/// Shared dispatcher state and the placement logic that mutates it.
///
/// Cheap to clone; every connection handler and both background loops hold a
/// clone of the same instance. Every operation that touches both structures
/// takes the ledger lock before the registry lock, and no lock is held across
/// a network call to a runner.
#[derive(Clone)]
pub struct Dispatcher {
    ledger: Arc<RwLock<CommitLedger>>,
    registry: Arc<RwLock<RunnerRegistry>>,
    placing: Arc<Mutex<HashSet<CommitId>>>,
    client: RunnerClient,
    store: ResultStore,
    max_missed_probes: u32,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(CommitLedger::new())),
            registry: Arc::new(RwLock::new(RunnerRegistry::new())),
            placing: Arc::new(Mutex::new(HashSet::new())),
            client: RunnerClient::new(config.runner_timeout()),
            store: ResultStore::new(config.results_dir.clone()),
            max_missed_probes: config.max_missed_probes.max(1),
        }
    }

    pub fn ledger(&self) -> Arc<RwLock<CommitLedger>> {
        self.ledger.clone()
    }

    pub fn registry(&self) -> Arc<RwLock<RunnerRegistry>> {
        self.registry.clone()
    }

    pub fn client(&self) -> &RunnerClient {
        &self.client
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Add a runner to the pool.
    ///
    /// A runner registering again under the same address has restarted, so
    /// whatever its old entry held goes back to pending. Returns those commits.
    pub async fn register(&self, runner: RunnerId) -> Vec<CommitId> {
        let mut ledger = self.ledger.write().await;
        let mut registry = self.registry.write().await;
        match registry.register(runner.clone()) {
            Some(held) => Self::requeue_locked(&mut ledger, held, &runner),
            None => Vec::new(),
        }
    }

    /// Record a commit as pending without placing it.
    ///
    /// The commit is queued even when no runner is registered, in which case
    /// `NoRunnersAvailable` is returned so the caller can say so.
    pub async fn submit(&self, commit: CommitId) -> Result<bool> {
        let newly_queued = self.ledger.write().await.enqueue(commit.clone());
        if newly_queued {
            tracing::info!(commit = %commit, "Commit queued");
        } else {
            tracing::debug!(commit = %commit, "Commit already known, not queued again");
        }

        if self.registry.read().await.is_empty() {
            return Err(DispatchError::NoRunnersAvailable);
        }
        Ok(newly_queued)
    }

    /// Queue a commit and try to place it right away.
    pub async fn dispatch(&self, commit: CommitId) -> Result<Placement> {
        self.submit(commit.clone()).await?;
        Ok(self.place(&commit).await)
    }

    /// Offer a pending commit to each eligible runner in registration order
    /// and assign it to the first one that accepts.
    ///
    /// Runners that cannot be reached count as a missed probe and are evicted
    /// once they reach the configured threshold.
    pub async fn place(&self, commit: &CommitId) -> Placement {
        let Some(_claim) = self.claim(commit) else {
            return Placement::InProgress;
        };

        if !self.ledger.read().await.is_pending(commit) {
            return Placement::NotPending;
        }
        let runners = self.registry.read().await.available();
        if runners.is_empty() {
            return Placement::NoRunners;
        }

        for runner in runners {
            match self.client.run_test(&runner, commit).await {
                Ok(true) => {
                    if self.assign(commit, &runner).await {
                        tracing::info!(commit = %commit, runner = %runner, "Commit assigned");
                        return Placement::Assigned(runner);
                    }
                    if !self.ledger.read().await.is_pending(commit) {
                        return Placement::NotPending;
                    }
                    tracing::debug!(commit = %commit, runner = %runner, "Runner left the pool before assignment");
                }
                Ok(false) => {
                    tracing::debug!(commit = %commit, runner = %runner, "Runner declined commit");
                }
                Err(e) => {
                    tracing::warn!(commit = %commit, runner = %runner, error = %e, "Failed to hand commit to runner");
                    self.runner_failed(&runner).await;
                }
            }
        }

        tracing::debug!(commit = %commit, "No runner accepted commit, leaving it pending");
        Placement::Declined
    }

    async fn assign(&self, commit: &CommitId, runner: &RunnerId) -> bool {
        let mut ledger = self.ledger.write().await;
        let mut registry = self.registry.write().await;
        if !registry.contains(runner) || !ledger.try_assign(commit, runner) {
            return false;
        }
        registry.note_assigned(runner, commit)
    }

    /// Record results for a commit and persist them.
    ///
    /// Returns the runner the commit was assigned to. A commit that is unknown
    /// or already completed yields `StaleResult` and leaves everything untouched.
    pub async fn complete(&self, commit: &CommitId, payload: Vec<u8>) -> Result<Option<RunnerId>> {
        let runner = {
            let mut ledger = self.ledger.write().await;
            let mut registry = self.registry.write().await;
            let runner = ledger.complete(commit, payload.clone())?;
            if let Some(runner) = &runner {
                registry.release(runner, commit);
            }
            runner
        };

        tracing::info!(
            commit = %commit,
            runner = ?runner.as_ref().map(|r| r.to_string()),
            bytes = payload.len(),
            "Results received"
        );
        self.store.persist(commit, &payload).await?;
        Ok(runner)
    }

    pub async fn record_alive(&self, runner: &RunnerId) {
        self.registry.write().await.record_alive(runner);
    }

    /// Count a failed exchange against a runner. Evicts it once the miss
    /// threshold is reached and returns the commits that went back to pending.
    pub async fn runner_failed(&self, runner: &RunnerId) -> Option<Vec<CommitId>> {
        let mut ledger = self.ledger.write().await;
        let mut registry = self.registry.write().await;

        let missed = registry.record_missed(runner)?;
        if missed < self.max_missed_probes {
            tracing::debug!(runner = %runner, missed, "Runner marked unresponsive");
            return None;
        }
        Some(Self::evict_locked(&mut ledger, &mut registry, runner))
    }

    /// Remove a runner and requeue everything it was holding.
    pub async fn evict(&self, runner: &RunnerId) -> Vec<CommitId> {
        let mut ledger = self.ledger.write().await;
        let mut registry = self.registry.write().await;
        Self::evict_locked(&mut ledger, &mut registry, runner)
    }

    fn evict_locked(
        ledger: &mut CommitLedger,
        registry: &mut RunnerRegistry,
        runner: &RunnerId,
    ) -> Vec<CommitId> {
        let held = registry.evict(runner);
        Self::requeue_locked(ledger, held, runner)
    }

    fn requeue_locked(
        ledger: &mut CommitLedger,
        held: HashSet<CommitId>,
        runner: &RunnerId,
    ) -> Vec<CommitId> {
        let mut requeued: Vec<CommitId> = held
            .into_iter()
            .filter(|commit| ledger.requeue(commit))
            .collect();
        requeued.sort();

        for commit in &requeued {
            tracing::info!(commit = %commit, runner = %runner, "Commit requeued");
        }
        requeued
    }

    pub async fn pending_commits(&self) -> Vec<CommitId> {
        self.ledger.read().await.pending()
    }

    pub async fn runners(&self) -> Vec<RunnerId> {
        self.registry.read().await.list()
    }

    pub async fn commit_status(&self, commit: &CommitId) -> Option<CommitStatus> {
        self.ledger.read().await.status(commit)
    }

    pub async fn assigned_runner(&self, commit: &CommitId) -> Option<RunnerId> {
        self.ledger.read().await.assigned_runner(commit).cloned()
    }

    fn claim(&self, commit: &CommitId) -> Option<PlacementClaim<'_>> {
        let mut placing = self.placing.lock().unwrap_or_else(|e| e.into_inner());
        if !placing.insert(commit.clone()) {
            return None;
        }
        Some(PlacementClaim {
            placing: &self.placing,
            commit: commit.clone(),
        })
    }
}

/// Marks a commit as being placed until dropped.
struct PlacementClaim<'a> {
    placing: &'a Mutex<HashSet<CommitId>>,
    commit: CommitId,
}

impl Drop for PlacementClaim<'_> {
    fn drop(&mut self) {
        let mut placing = self.placing.lock().unwrap_or_else(|e| e.into_inner());
        placing.remove(&self.commit);
    }
}
