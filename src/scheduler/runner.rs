use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::commit::CommitId;

/// Network identity of a runner. Two registrations with the same host and port
/// are the same runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunnerId {
    pub host: String,
    pub port: u16,
}

impl RunnerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address to dial, in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for RunnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Liveness {
    Alive,
    Unresponsive,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Liveness::Alive => write!(f, "alive"),
            Liveness::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

/// Runner state tracking
#[derive(Debug, Clone)]
pub struct RunnerState {
    pub id: RunnerId,
    pub liveness: Liveness,
    pub missed_probes: u32,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Instant,
    pub assigned: HashSet<CommitId>,
}

impl RunnerState {
    pub fn new(id: RunnerId) -> Self {
        Self {
            id,
            liveness: Liveness::Alive,
            missed_probes: 0,
            registered_at: Utc::now(),
            last_seen: Instant::now(),
            assigned: HashSet::new(),
        }
    }

    pub fn mark_alive(&mut self) {
        self.liveness = Liveness::Alive;
        self.missed_probes = 0;
        self.last_seen = Instant::now();
    }

    /// Record a failed exchange and return the consecutive miss count
    pub fn mark_missed(&mut self) -> u32 {
        self.liveness = Liveness::Unresponsive;
        self.missed_probes += 1;
        self.missed_probes
    }

    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }
}
