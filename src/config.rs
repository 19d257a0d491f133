use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the dispatcher server and its background loops.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Host the command socket binds to
    pub host: String,
    /// Port the command socket binds to (0 picks an ephemeral port)
    pub port: u16,
    /// Period between liveness probe rounds
    pub liveness_interval_ms: u64,
    /// Period between redistribution passes over the pending queue
    pub redistribute_interval_ms: u64,
    /// Upper bound on any single exchange with a runner (probe or runtest)
    pub runner_timeout_ms: u64,
    /// Upper bound on reading one command from an inbound connection
    pub read_timeout_ms: u64,
    /// Consecutive failed probes before a runner is evicted
    pub max_missed_probes: u32,
    /// Largest results payload accepted on the wire
    pub max_payload_bytes: usize,
    /// Directory completed results are written to, one file per commit
    pub results_dir: PathBuf,
    /// Optional `host:port` for the read-only HTTP dashboard
    pub dashboard_addr: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8888,
            liveness_interval_ms: 1000,
            redistribute_interval_ms: 5000,
            runner_timeout_ms: 2000,
            read_timeout_ms: 5000,
            max_missed_probes: 1,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            results_dir: PathBuf::from("test_results"),
            dashboard_addr: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn redistribute_interval(&self) -> Duration {
        Duration::from_millis(self.redistribute_interval_ms)
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_millis(self.runner_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Configuration for the repository watcher that feeds new commits to the dispatcher.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Dispatcher address in `host:port` form
    pub dispatcher_addr: String,
    /// Repository passed to the update script
    pub repo: PathBuf,
    /// Script that refreshes the repository and writes the newest commit id
    pub update_script: PathBuf,
    /// File the update script leaves behind when a new commit exists
    pub commit_file: PathBuf,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            dispatcher_addr: "localhost:8888".to_string(),
            repo: PathBuf::from("."),
            update_script: PathBuf::from("./update_repo.sh"),
            commit_file: PathBuf::from(".commit_id"),
            poll_interval_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

impl ObserverConfig {
    pub fn new(dispatcher_addr: impl Into<String>, repo: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher_addr: dispatcher_addr.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
