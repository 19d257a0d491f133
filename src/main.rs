use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ci_dispatcher::config::{DispatcherConfig, ObserverConfig};
use ci_dispatcher::node::Node;
use ci_dispatcher::observer::RepoObserver;
use ci_dispatcher::protocol::{communicate, Request};
use ci_dispatcher::scheduler::CommitId;
use ci_dispatcher::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "ci-dispatcher")]
#[command(version)]
#[command(about = "Hands new commits to a pool of CI test runners")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the dispatcher server
    Server(ServerArgs),

    /// Watch a repository and dispatch each new commit
    Observe(ObserveArgs),

    /// Send a single command to a running dispatcher
    Ctl {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: CtlCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Dispatcher's host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Dispatcher's port
    #[arg(long, default_value = "8888")]
    port: u16,

    /// Port for the HTTP status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Directory completed results are written to
    #[arg(long, default_value = "test_results")]
    results_dir: PathBuf,

    /// Milliseconds between liveness probe rounds
    #[arg(long, default_value = "1000")]
    liveness_interval_ms: u64,

    /// Milliseconds between redistribution passes
    #[arg(long, default_value = "5000")]
    redistribute_interval_ms: u64,

    /// Timeout for a single probe or runtest exchange, in milliseconds
    #[arg(long, default_value = "2000")]
    runner_timeout_ms: u64,

    /// Failed probes in a row before a runner is evicted
    #[arg(long, default_value = "1")]
    max_missed_probes: u32,
}

// =============================================================================
// Observer Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ObserveArgs {
    /// Dispatcher host:port
    #[arg(long, default_value = "localhost:8888")]
    dispatcher_server: String,

    /// Script that updates the repository and writes new commit ids
    #[arg(long, default_value = "./update_repo.sh")]
    update_script: PathBuf,

    /// File the update script writes the new commit id to
    #[arg(long, default_value = ".commit_id")]
    commit_file: PathBuf,

    /// Milliseconds between polls
    #[arg(long, default_value = "5000")]
    poll_interval_ms: u64,

    /// The path of the repository to observe
    #[arg(value_name = "REPO")]
    repo: PathBuf,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Dispatcher host:port
    #[arg(long, short = 'a', default_value = "localhost:8888")]
    addr: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum CtlCommands {
    /// Check the dispatcher is up
    Status,
    /// Queue a commit for testing
    Dispatch {
        /// The commit id
        commit: String,
    },
}

#[derive(Serialize)]
struct CtlOutput {
    command: String,
    reply: String,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = DispatcherConfig {
        host: args.host.clone(),
        port: args.port,
        liveness_interval_ms: args.liveness_interval_ms,
        redistribute_interval_ms: args.redistribute_interval_ms,
        runner_timeout_ms: args.runner_timeout_ms,
        max_missed_probes: args.max_missed_probes,
        results_dir: args.results_dir,
        dashboard_addr: args
            .dashboard_port
            .map(|port| format!("{}:{}", args.host, port)),
        ..DispatcherConfig::default()
    };

    tracing::info!(
        listen_addr = %config.listen_addr(),
        dashboard_addr = ?config.dashboard_addr,
        results_dir = %config.results_dir.display(),
        "Starting dispatcher"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::bind(config).await?;
    node.run(shutdown).await?;
    Ok(())
}

async fn run_observer(args: ObserveArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = ObserverConfig {
        dispatcher_addr: args.dispatcher_server,
        repo: args.repo,
        update_script: args.update_script,
        commit_file: args.commit_file,
        poll_interval_ms: args.poll_interval_ms,
        ..ObserverConfig::default()
    };

    let shutdown = install_shutdown_handler()?;
    RepoObserver::new(config).run(shutdown).await?;
    Ok(())
}

async fn run_ctl(client: ClientArgs, command: CtlCommands) -> Result<(), Box<dyn std::error::Error>> {
    let request = match command {
        CtlCommands::Status => Request::Status,
        CtlCommands::Dispatch { commit } => {
            let commit = CommitId::parse(&commit)
                .ok_or_else(|| format!("Invalid commit id: {:?}", commit))?;
            Request::Dispatch(commit)
        }
    };
    let encoded = request.encode();

    let reply = communicate(
        &client.addr,
        &encoded,
        Duration::from_millis(client.timeout_ms),
    )
    .await?;

    match client.output {
        OutputFormat::Json => {
            let output = CtlOutput {
                command: String::from_utf8_lossy(&encoded).into_owned(),
                reply,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", reply);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Observe(observe_args) => run_observer(observe_args).await?,
        Commands::Ctl { client, command } => run_ctl(client, command).await?,
    }

    Ok(())
}
