use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::protocol::{read_request, write_reply, Reply, Request};
use crate::scheduler::{CommitId, Dispatcher, Placement};

/// Accepts command connections and serves each on its own task.
pub struct CommandServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    read_timeout: Duration,
    max_payload_bytes: usize,
}

impl CommandServer {
    pub async fn bind(config: &DispatcherConfig, dispatcher: Dispatcher) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self {
            listener,
            dispatcher,
            read_timeout: config.read_timeout(),
            max_payload_bytes: config.max_payload_bytes,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the token is cancelled, then wait for the
    /// connections already in flight to finish their exchange.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let tracker = TaskTracker::new();
        tracing::info!(addr = %self.listener.local_addr()?, "Dispatcher listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            dispatcher: self.dispatcher.clone(),
                            read_timeout: self.read_timeout,
                            max_payload_bytes: self.max_payload_bytes,
                        };
                        tracker.spawn(connection.serve(stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(self.listener);
        tracker.close();
        tracing::info!(in_flight = tracker.len(), "Stopped accepting connections, draining");
        tracker.wait().await;
        Ok(())
    }
}

struct Connection {
    dispatcher: Dispatcher,
    read_timeout: Duration,
    max_payload_bytes: usize,
}

impl Connection {
    async fn serve(self, mut stream: TcpStream, peer: SocketAddr) {
        let request = match read_request(&mut stream, self.max_payload_bytes, self.read_timeout).await {
            Ok(request) => request,
            Err(DispatchError::InvalidCommand(raw)) => {
                tracing::warn!(peer = %peer, command = %raw, "Invalid command");
                self.finish(&mut stream, peer, Reply::InvalidCommand).await;
                return;
            }
            Err(e) if e.is_transport() => {
                tracing::debug!(peer = %peer, error = %e, "Dropping connection");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Dropping connection");
                return;
            }
        };

        let (reply, follow_up) = self.handle(request).await;
        self.finish(&mut stream, peer, reply).await;

        // Placement runs after the reply so the caller never waits on runners.
        if let Some(commit) = follow_up {
            if let Placement::Assigned(runner) = self.dispatcher.place(&commit).await {
                tracing::debug!(commit = %commit, runner = %runner, "Placed on first attempt");
            }
        }
    }

    /// Apply a request. Returns the reply and, for dispatch, the commit to place.
    async fn handle(&self, request: Request) -> (Reply, Option<CommitId>) {
        match request {
            Request::Status => (Reply::Ok, None),
            Request::Register(runner) => {
                self.dispatcher.register(runner).await;
                (Reply::Ok, None)
            }
            Request::Dispatch(commit) => match self.dispatcher.submit(commit.clone()).await {
                Ok(_) => (Reply::Ok, Some(commit)),
                Err(DispatchError::NoRunnersAvailable) => {
                    tracing::warn!(commit = %commit, "No runners registered, commit left pending");
                    (Reply::NoRunners, None)
                }
                Err(e) => {
                    tracing::error!(commit = %commit, error = %e, "Dispatch failed");
                    (Reply::InvalidCommand, None)
                }
            },
            Request::Results { commit, payload } => {
                match self.dispatcher.complete(&commit, payload).await {
                    Ok(_) => (Reply::Ok, None),
                    Err(DispatchError::StaleResult(_)) => {
                        tracing::warn!(commit = %commit, "Stale result ignored");
                        (Reply::StaleResult, None)
                    }
                    Err(e) => {
                        tracing::error!(commit = %commit, error = %e, "Failed to store results");
                        (Reply::StoreFailed, None)
                    }
                }
            }
        }
    }

    async fn finish(&self, stream: &mut TcpStream, peer: SocketAddr, reply: Reply) {
        if let Err(e) = write_reply(stream, reply).await {
            tracing::warn!(peer = %peer, error = %e, "Failed to write reply");
            return;
        }
        let _ = stream.shutdown().await;
    }
}
