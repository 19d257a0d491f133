use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::runner::RunnerId;

/// Opaque identifier of a source revision to test.
///
/// Restricted to `[A-Za-z0-9._-]` without a leading dot so it can double as a
/// result file name and never collides with the `:` separators of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('.') {
            return None;
        }
        let valid = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitStatus {
    Pending,
    Assigned,
    Completed,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitStatus::Pending => write!(f, "pending"),
            CommitStatus::Assigned => write!(f, "assigned"),
            CommitStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Terminal record of a commit whose results came back.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub commit: CommitId,
    pub payload: Vec<u8>,
    /// Runner the commit was assigned to when the results arrived, if any
    pub runner: Option<RunnerId>,
    pub completed_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(commit: CommitId, payload: Vec<u8>, runner: Option<RunnerId>) -> Self {
        Self {
            commit,
            payload,
            runner,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_hashes_and_refs() {
        assert_eq!(CommitId::parse("abc123").unwrap().as_str(), "abc123");
        assert_eq!(CommitId::parse(" def456\n").unwrap().as_str(), "def456");
        assert!(CommitId::parse("release-1.2_rc").is_some());
    }

    #[test]
    fn parse_rejects_unsafe_ids() {
        assert!(CommitId::parse("").is_none());
        assert!(CommitId::parse("..").is_none());
        assert!(CommitId::parse(".hidden").is_none());
        assert!(CommitId::parse("a/b").is_none());
        assert!(CommitId::parse("a:b").is_none());
        assert!(CommitId::parse("a b").is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(CommitStatus::Pending.to_string(), "pending");
        assert_eq!(CommitStatus::Assigned.to_string(), "assigned");
        assert_eq!(CommitStatus::Completed.to_string(), "completed");
    }
}
