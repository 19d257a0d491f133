use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{DispatchError, Result};
use crate::protocol::command::{RunnerCommand, ACCEPT, PONG};
use crate::scheduler::{CommitId, RunnerId};

const MAX_REPLY_BYTES: u64 = 1024;

/// Open a fresh connection, send one request and read the reply until the
/// peer closes. The whole exchange is bounded by `timeout`.
pub async fn communicate(addr: &str, request: &[u8], timeout: Duration) -> Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(request).await?;
        let mut reply = Vec::new();
        (&mut stream)
            .take(MAX_REPLY_BYTES)
            .read_to_end(&mut reply)
            .await?;
        Ok::<_, std::io::Error>(reply)
    };

    let reply = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| DispatchError::Timeout(timeout))??;

    Ok(String::from_utf8_lossy(&reply).trim().to_string())
}

/// Talks to runners: liveness probes and test requests.
#[derive(Debug, Clone)]
pub struct RunnerClient {
    timeout: Duration,
}

impl RunnerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a runner; anything but `pong` is a failure.
    pub async fn ping(&self, runner: &RunnerId) -> Result<()> {
        let reply = self.send(runner, &RunnerCommand::Ping).await?;
        if reply == PONG {
            Ok(())
        } else {
            Err(DispatchError::UnexpectedReply(reply))
        }
    }

    /// Ask a runner to test a commit.
    ///
    /// Returns `Ok(true)` when the runner accepts, `Ok(false)` when it declines
    /// (typically because it is busy). A silent hang-up is an error.
    pub async fn run_test(&self, runner: &RunnerId, commit: &CommitId) -> Result<bool> {
        let reply = self
            .send(runner, &RunnerCommand::RunTest(commit.clone()))
            .await?;
        if reply.is_empty() {
            return Err(DispatchError::UnexpectedReply(reply));
        }
        Ok(reply == ACCEPT)
    }

    async fn send(&self, runner: &RunnerId, command: &RunnerCommand) -> Result<String> {
        communicate(&runner.addr(), command.encode().as_bytes(), self.timeout)
            .await
            .map_err(|e| match e {
                DispatchError::TransportError(err) => DispatchError::RunnerUnreachable {
                    runner: runner.to_string(),
                    reason: err.to_string(),
                },
                other => other,
            })
    }
}
