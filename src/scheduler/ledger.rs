use std::collections::HashMap;

use indexmap::IndexSet;

use crate::error::{DispatchError, Result};
use crate::scheduler::commit::{CommitId, CommitStatus, TestResult};
use crate::scheduler::runner::RunnerId;

/// Tracks every known commit in exactly one of three places: the pending
/// queue, the assignment map, or the completed results.
#[derive(Debug, Default)]
pub struct CommitLedger {
    pending: IndexSet<CommitId>,
    assigned: HashMap<CommitId, RunnerId>,
    completed: HashMap<CommitId, TestResult>,
}

impl CommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a commit for placement. Returns false if the commit is already
    /// known in any state.
    pub fn enqueue(&mut self, commit: CommitId) -> bool {
        if self.status(&commit).is_some() {
            return false;
        }
        self.pending.insert(commit)
    }

    /// Move a pending commit onto a runner. Fails closed for anything not pending.
    pub fn try_assign(&mut self, commit: &CommitId, runner: &RunnerId) -> bool {
        if !self.pending.shift_remove(commit) {
            return false;
        }
        self.assigned.insert(commit.clone(), runner.clone());
        true
    }

    /// Record results for a commit.
    ///
    /// Assigned commits are the normal case. Pending commits are accepted too:
    /// the runner may answer before its assignment is recorded, or finish after
    /// being evicted. Returns the runner the commit was assigned to.
    pub fn complete(&mut self, commit: &CommitId, payload: Vec<u8>) -> Result<Option<RunnerId>> {
        let runner = if let Some(runner) = self.assigned.remove(commit) {
            Some(runner)
        } else if self.pending.shift_remove(commit) {
            None
        } else {
            return Err(DispatchError::StaleResult(commit.to_string()));
        };

        self.completed.insert(
            commit.clone(),
            TestResult::new(commit.clone(), payload, runner.clone()),
        );
        Ok(runner)
    }

    /// Put an assigned commit back at the end of the pending queue.
    /// No-op if it is not assigned, e.g. because it completed concurrently.
    pub fn requeue(&mut self, commit: &CommitId) -> bool {
        if self.assigned.remove(commit).is_none() {
            return false;
        }
        self.pending.insert(commit.clone());
        true
    }

    pub fn status(&self, commit: &CommitId) -> Option<CommitStatus> {
        if self.pending.contains(commit) {
            Some(CommitStatus::Pending)
        } else if self.assigned.contains_key(commit) {
            Some(CommitStatus::Assigned)
        } else if self.completed.contains_key(commit) {
            Some(CommitStatus::Completed)
        } else {
            None
        }
    }

    pub fn is_pending(&self, commit: &CommitId) -> bool {
        self.pending.contains(commit)
    }

    pub fn assigned_runner(&self, commit: &CommitId) -> Option<&RunnerId> {
        self.assigned.get(commit)
    }

    pub fn result(&self, commit: &CommitId) -> Option<&TestResult> {
        self.completed.get(commit)
    }

    /// Snapshot of the pending queue in arrival order
    pub fn pending(&self) -> Vec<CommitId> {
        self.pending.iter().cloned().collect()
    }

    /// Snapshot of current assignments, sorted by commit
    pub fn assignments(&self) -> Vec<(CommitId, RunnerId)> {
        let mut assignments: Vec<(CommitId, RunnerId)> = self
            .assigned
            .iter()
            .map(|(c, r)| (c.clone(), r.clone()))
            .collect();
        assignments.sort_by(|a, b| a.0.cmp(&b.0));
        assignments
    }

    /// Completed results sorted chronologically
    pub fn completed(&self) -> Vec<&TestResult> {
        let mut results: Vec<&TestResult> = self.completed.values().collect();
        results.sort_by_key(|r| r.completed_at);
        results
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn assigned_len(&self) -> usize {
        self.assigned.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Total number of commits the ledger knows about
    pub fn len(&self) -> usize {
        self.pending.len() + self.assigned.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
