use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::monitor::{LivenessMonitor, Redistributor};
use crate::scheduler::Dispatcher;
use crate::server::CommandServer;

/// Main node that orchestrates all components
pub struct Node {
    pub config: DispatcherConfig,
    dispatcher: Dispatcher,
    server: CommandServer,
}

impl Node {
    /// Create the shared dispatcher state and bind the command socket.
    pub async fn bind(config: DispatcherConfig) -> std::io::Result<Self> {
        let dispatcher = Dispatcher::new(&config);
        let server = CommandServer::bind(&config, dispatcher.clone()).await?;
        Ok(Self {
            config,
            dispatcher,
            server,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Run the node with all components.
    ///
    /// 1. Spawns the liveness monitor (probes runners, evicts failures)
    /// 2. Spawns the redistributor (retries placement of pending commits)
    /// 3. Optionally spawns the HTTP dashboard
    /// 4. Serves the command socket until `shutdown` is cancelled
    ///
    /// On shutdown the server drains in-flight connections first, then the
    /// background tasks are awaited so no loop outlives the shared state.
    ///
    /// # Errors
    ///
    /// Returns an error if the command server fails. The background loops
    /// absorb runner failures and never stop the node on their own.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let monitor = LivenessMonitor::new(self.dispatcher.clone(), self.config.liveness_interval());
        let monitor_token = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run(monitor_token).await;
        });

        let redistributor =
            Redistributor::new(self.dispatcher.clone(), self.config.redistribute_interval());
        let redistributor_token = shutdown.clone();
        let redistributor_handle = tokio::spawn(async move {
            redistributor.run(redistributor_token).await;
        });

        let dashboard_handle = self.config.dashboard_addr.clone().map(|addr| {
            let state = DashboardState {
                dispatcher: self.dispatcher.clone(),
            };
            let dashboard_token = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(addr, state, dashboard_token).await;
            })
        });

        let served = self.server.run(shutdown.clone()).await;
        // A failed server still has to stop the loops.
        shutdown.cancel();

        for (name, handle) in [
            ("liveness monitor", monitor_handle),
            ("redistributor", redistributor_handle),
        ] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task panicked");
            }
        }
        if let Some(handle) = dashboard_handle {
            if let Err(e) = handle.await {
                tracing::error!(task = "dashboard", error = %e, "Background task panicked");
            }
        }

        tracing::info!("Dispatcher stopped");
        served
    }
}
