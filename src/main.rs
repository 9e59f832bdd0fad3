use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use labyard::config::{AppConfig, CliOverrides, ConfigWatcher};
use labyard::orchestrator::{ttl, Orchestrator};
use labyard::storage::Storage;
use labyard::supervisor::client::RemoteSupervisor;
use labyard::supervisor::engine::DockerSupervisor;
use labyard::{rest, telemetry, AppContext};

#[derive(Parser)]
#[command(name = "labyardd", about = "Session orchestrator, supervisor, and grading pipeline for container-in-container lab workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "HTTP_PORT", global = true)]
    http_port: Option<u16>,

    #[arg(long, env = "SESSION_TTL_SECONDS", global = true)]
    session_ttl_seconds: Option<u64>,

    #[arg(long, env = "STORE_PATH", global = true)]
    store_path: Option<String>,

    #[arg(long, env = "SUPERVISOR_BASE_URL", global = true)]
    supervisor_base_url: Option<String>,

    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[arg(long, env = "LOG_FILE", global = true)]
    log_file: Option<String>,

    #[arg(long, env = "TOKEN_SECRET", global = true)]
    token_secret: Option<String>,

    #[arg(long, env = "CONFIG_PATH", global = true, default_value = "config.toml")]
    config_path: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session orchestrator (REST + WebSocket, persistence, TTL sweep).
    Orchestrate,
    /// Run the supervisor (owns the container engine socket).
    Supervisor {
        #[arg(long, default_value_t = 8081)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(AppConfig::new(
        CliOverrides {
            http_port: cli.http_port,
            session_ttl_seconds: cli.session_ttl_seconds,
            store_path: cli.store_path.clone(),
            supervisor_base_url: cli.supervisor_base_url.clone(),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
            token_secret: cli.token_secret.clone(),
        },
        &PathBuf::from(&cli.config_path),
    ));

    let log_level = config.hot.read().await.log_level.clone();
    let (_log_guard, filter_handle) = telemetry::init(&log_level, config.log_file.as_deref());

    let _watcher = ConfigWatcher::spawn(PathBuf::from(&cli.config_path), config.hot.clone(), filter_handle)
        .map_err(|err| tracing::warn!(?err, "config hot-reload watcher not started"))
        .ok();

    match cli.command {
        Command::Orchestrate => run_orchestrator(config).await,
        Command::Supervisor { port } => run_supervisor(port).await,
    }
}

async fn run_orchestrator(config: Arc<AppConfig>) -> Result<()> {
    let storage = Arc::new(Storage::connect(&config.store_path).await?);
    let recovered = storage.recover_stale_sessions(chrono::Utc::now()).await?;
    if recovered > 0 {
        tracing::info!(recovered, "marked stale sessions as ended at startup");
    }

    let supervisor: Arc<dyn labyard::supervisor::Supervisor> =
        Arc::new(RemoteSupervisor::new(config.supervisor_base_url.clone()));
    let orchestrator = Arc::new(Orchestrator::new(storage.clone(), supervisor, config.clone()));

    let sweep_interval = config.ttl_sweep_interval_seconds;
    let _sweeper = ttl::spawn(orchestrator.clone(), sweep_interval);

    let ctx = Arc::new(AppContext::new(config, storage, orchestrator));
    rest::start_server(ctx).await
}

async fn run_supervisor(port: u16) -> Result<()> {
    let supervisor = DockerSupervisor::connect()?;
    let _sweeper = supervisor.clone().spawn_sweeper(30);
    let router = labyard::supervisor::server::build_router(supervisor);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "supervisor listening");
    axum::serve(listener, router).await?;
    Ok(())
}
