//! Sticky-session HTTP gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                 MASTER                        │
//!     Client TCP         │  ┌──────────┐   ┌─────────────┐              │
//!     ───────────────────┼─▶│ listener │──▶│ distributor │──fingerprint │
//!                        │  └──────────┘   └──────┬──────┘  (client IP) │
//!                        │                        │ SCM_RIGHTS           │
//!                        │   registry: spawn / observe / respawn        │
//!                        └────────────────────────┼─────────────────────┘
//!                                                 ▼
//!                        ┌──────────────────────────────────────────────┐
//!                        │              WORKER i (of N)                  │
//!                        │  adoption ─▶ gateway server ─▶ routing ──────┼──▶ Backend
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! The same executable runs both roles: without a subcommand it is the
//! master; the master re-runs it with the hidden `worker` subcommand.

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::Instrument;

use sticky_gateway::cluster::{ProcessSpawner, WorkerRegistry};
use sticky_gateway::config::{load_config, GatewayConfig};
use sticky_gateway::lifecycle::{shutdown_signal, Shutdown};
use sticky_gateway::net::{Distributor, PublicListener};
use sticky_gateway::observability::{init_logging, metrics};
use sticky_gateway::worker::run_worker;

#[derive(Parser)]
#[command(name = "sticky-gateway")]
#[command(about = "HTTP gateway with client-IP sticky worker processes", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master: own the public port and supervise workers (default)
    Master,
    /// Internal: run one worker process
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        control_fd: RawFd,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command.unwrap_or(Commands::Master) {
        Commands::Master => runtime.block_on(run_master(config, cli.config)),
        Commands::Worker { index, control_fd } => {
            runtime.block_on(worker_main(config, index, control_fd))
        }
    }
}

async fn run_master(
    config: GatewayConfig,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sticky-gateway starting");

    let pool_size = config.pool_size();
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        workers = pool_size,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address)?;
    }

    let listener = PublicListener::bind(&config.listener).await?;
    let spawner = ProcessSpawner::current_exe(config_path)?;
    let (mut registry, events) = WorkerRegistry::new(
        pool_size,
        spawner,
        Duration::from_millis(config.cluster.spawn_retry_delay_ms),
    );
    registry.start();

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    Distributor::new(listener, registry, events).run(stop).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn worker_main(
    config: GatewayConfig,
    index: usize,
    control_fd: RawFd,
) -> Result<(), Box<dyn std::error::Error>> {
    let span = tracing::info_span!("worker", index, pid = std::process::id());
    async move {
        if config.observability.metrics_enabled {
            let addr = metrics::worker_metrics_address(config.observability.metrics_address, index);
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::warn!(address = %addr, error = %e, "Worker metrics disabled");
            }
        }
        run_worker(config, control_fd).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .instrument(span)
    .await
}
