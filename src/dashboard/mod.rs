use chrono::{DateTime, Utc};

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{CommitId, Dispatcher, Liveness};

#[derive(Clone)]
pub struct DashboardState {
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub runners: usize,
    pub pending: usize,
    pub assigned: usize,
    pub completed: usize,
}

#[derive(Debug, Serialize)]
pub struct RunnerResponse {
    pub address: String,
    pub liveness: Liveness,
    pub missed_probes: u32,
    pub registered_at: DateTime<Utc>,
    /// Milliseconds since the runner last answered
    pub last_seen_ms_ago: u64,
    pub assigned: Vec<CommitId>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub commit: CommitId,
    pub runner: String,
}

#[derive(Debug, Serialize)]
pub struct CompletedResponse {
    pub commit: CommitId,
    pub runner: Option<String>,
    pub bytes: usize,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommitsResponse {
    pub pending: Vec<CommitId>,
    pub assigned: Vec<AssignmentResponse>,
    pub completed: Vec<CompletedResponse>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/runners", get(runners_handler))
        .route("/api/commits", get(commits_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: String, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };
    tracing::info!(addr = %addr, "Starting dashboard server");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let ledger = state.dispatcher.ledger();
    let registry = state.dispatcher.registry();
    let ledger = ledger.read().await;
    let registry = registry.read().await;

    Json(StatusResponse {
        runners: registry.len(),
        pending: ledger.pending_len(),
        assigned: ledger.assigned_len(),
        completed: ledger.completed_len(),
    })
}

async fn runners_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let registry = state.dispatcher.registry();
    let registry = registry.read().await;

    let runners: Vec<RunnerResponse> = registry
        .all_runners()
        .into_iter()
        .map(|runner| {
            let mut assigned: Vec<CommitId> = runner.assigned.iter().cloned().collect();
            assigned.sort();
            RunnerResponse {
                address: runner.id.to_string(),
                liveness: runner.liveness,
                missed_probes: runner.missed_probes,
                registered_at: runner.registered_at,
                last_seen_ms_ago: runner.last_seen.elapsed().as_millis() as u64,
                assigned,
            }
        })
        .collect();

    Json(runners)
}

async fn commits_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let ledger = state.dispatcher.ledger();
    let ledger = ledger.read().await;

    Json(CommitsResponse {
        pending: ledger.pending(),
        assigned: ledger
            .assignments()
            .into_iter()
            .map(|(commit, runner)| AssignmentResponse {
                commit,
                runner: runner.to_string(),
            })
            .collect(),
        completed: ledger
            .completed()
            .into_iter()
            .map(|result| CompletedResponse {
                commit: result.commit.clone(),
                runner: result.runner.as_ref().map(|r| r.to_string()),
                bytes: result.payload.len(),
                completed_at: result.completed_at,
            })
            .collect(),
    })
}
