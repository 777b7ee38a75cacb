mod config;
mod error;
mod rpc;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;

use marcus_core::interfaces::{NullBoardProvider, NullLanguageModel, NullProjectPlanner};
use marcus_core::lease::SystemClock;
use marcus_core::{Coordinator, EventBus};
use marcus_db::{ConversationLog, KvStore, MemoryKvStore};

use config::MarcusConfig;

#[derive(Parser)]
#[command(name = "marcus-server", about = "Marcus project-manager service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator and serve the Agent RPC + status HTTP surface.
    Serve {
        /// Path to config.toml (defaults to the XDG config dir)
        #[arg(long)]
        config: Option<PathBuf>,
        /// PostgreSQL connection URL; falls back to an in-process store when unset
        #[arg(long)]
        database_url: Option<String>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, database_url, bind, port } => {
            let resolved = MarcusConfig::resolve(config, database_url, bind, port)?;
            run_serve(resolved).await
        }
    }
}

async fn run_serve(config: MarcusConfig) -> Result<()> {
    let kv: Arc<dyn KvStore> = match &config.database_url {
        Some(url) => {
            let db_config = marcus_db::DbConfig::new(url.clone());
            let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("../marcus-db/migrations");
            let store = marcus_db::PostgresKvStore::connect(&db_config, &migrations_dir)
                .await
                .context("connecting to postgres kv store")?;
            Arc::new(store)
        }
        None => Arc::new(MemoryKvStore::new()),
    };

    let events = EventBus::new();
    let log_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marcus")
        .join("conversations");
    let conversation_log = Arc::new(ConversationLog::new(log_dir));

    let llm: Arc<dyn marcus_core::interfaces::LanguageModel> = Arc::new(NullLanguageModel);

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator.clone(),
        Arc::new(marcus_core::task::TaskRegistry::new()),
        kv.clone(),
        events,
        conversation_log.clone(),
        Arc::new(NullBoardProvider),
        Arc::new(NullProjectPlanner),
        llm,
        Arc::new(SystemClock),
    ));

    spawn_monitoring_loop(coordinator.clone(), Duration::from_secs(config.monitoring_interval_seconds));

    let app = Router::new()
        .merge(rpc::router(coordinator.clone()))
        .merge(status::router(coordinator.clone()))
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.bind, config.port);
    tracing::info!(%addr, "marcus-server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator.clone()))
        .await?;

    tracing::info!("marcus-server shut down");
    Ok(())
}

/// Periodically sweeps lease expiry for the active project, since the
/// `Coordinator` exposes this as a pull-based check rather than owning its
/// own background loop (spec §6, `monitoring_interval`).
fn spawn_monitoring_loop(coordinator: Arc<Coordinator>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(project_id) = coordinator.registry().active_project().await else {
                continue;
            };
            match coordinator.sweep_expired_leases(&project_id).await {
                Ok(recycled) if !recycled.is_empty() => {
                    tracing::info!(count = recycled.len(), "recycled expired leases");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "lease sweep failed"),
            }
        }
    });
}

/// The `MemoryKvStore` backend flushes itself on its own interval and the
/// Postgres backend writes synchronously, so there is no separate flush
/// step here -- only the `system_shutdown` event needs to be published
/// before the listener stops accepting connections.
async fn shutdown_signal(coordinator: Arc<Coordinator>) {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    tracing::info!("shutting down");
    if let Err(err) = coordinator.shutdown().await {
        tracing::error!(error = %err, "coordinator shutdown emit failed");
    }
}
