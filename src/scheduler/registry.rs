use std::collections::HashSet;

use indexmap::IndexMap;

use crate::scheduler::commit::CommitId;
use crate::scheduler::runner::{RunnerId, RunnerState};

/// Pool of registered runners, iterated in registration order.
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: IndexMap<RunnerId, RunnerState>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner, replacing any previous entry for the same address.
    ///
    /// A replaced runner keeps its position in the pool but starts over with
    /// no commits. Returns the commits the old entry held, or None for a new runner.
    pub fn register(&mut self, id: RunnerId) -> Option<HashSet<CommitId>> {
        let previous = self.runners.insert(id.clone(), RunnerState::new(id.clone()));
        match previous {
            Some(old) => {
                tracing::info!(runner = %id, held = old.assigned.len(), "Runner re-registered");
                Some(old.assigned)
            }
            None => {
                tracing::info!(runner = %id, "Runner registered");
                None
            }
        }
    }

    /// Snapshot of every runner identity, in registration order
    pub fn list(&self) -> Vec<RunnerId> {
        self.runners.keys().cloned().collect()
    }

    /// Snapshot of runners currently eligible for new work
    pub fn available(&self) -> Vec<RunnerId> {
        self.runners
            .values()
            .filter(|r| r.is_alive())
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn get(&self, id: &RunnerId) -> Option<&RunnerState> {
        self.runners.get(id)
    }

    pub fn contains(&self, id: &RunnerId) -> bool {
        self.runners.contains_key(id)
    }

    pub fn all_runners(&self) -> Vec<&RunnerState> {
        self.runners.values().collect()
    }

    pub fn record_alive(&mut self, id: &RunnerId) {
        if let Some(runner) = self.runners.get_mut(id) {
            runner.mark_alive();
        }
    }

    /// Record a failed exchange. Returns the consecutive miss count, or None
    /// if the runner is not registered.
    pub fn record_missed(&mut self, id: &RunnerId) -> Option<u32> {
        self.runners.get_mut(id).map(|r| r.mark_missed())
    }

    pub fn note_assigned(&mut self, id: &RunnerId, commit: &CommitId) -> bool {
        match self.runners.get_mut(id) {
            Some(runner) => {
                runner.assigned.insert(commit.clone());
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, id: &RunnerId, commit: &CommitId) {
        if let Some(runner) = self.runners.get_mut(id) {
            runner.assigned.remove(commit);
        }
    }

    /// Remove a runner and hand back the commits it was holding.
    /// Unknown runners yield an empty set.
    pub fn evict(&mut self, id: &RunnerId) -> HashSet<CommitId> {
        match self.runners.shift_remove(id) {
            Some(runner) => {
                tracing::info!(runner = %id, held = runner.assigned.len(), "Runner evicted");
                runner.assigned
            }
            None => HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
