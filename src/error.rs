use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    #[error("No runners are registered")]
    NoRunnersAvailable,

    #[error("Runner {runner} unreachable: {reason}")]
    RunnerUnreachable { runner: String, reason: String },

    #[error("Stale result for commit {0}")]
    StaleResult(String),

    #[error("Result payload truncated: expected {expected} bytes, received {received}")]
    TruncatedPayload { expected: usize, received: usize },

    #[error("Result payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(String),

    #[error("Repository update failed: {0}")]
    UpdateFailed(String),

    #[error("Transport error: {0}")]
    TransportError(#[from] std::io::Error),
}

impl DispatchError {
    /// Errors that mean the peer could not be talked to at all.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DispatchError::TransportError(_)
                | DispatchError::Timeout(_)
                | DispatchError::RunnerUnreachable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
