//! Minimal backend service for local runs of the gateway.
//!
//! `mock-backend --name users --port 8001` answers `Hello users!` on every
//! path.

use std::net::SocketAddr;

use axum::{extract::State, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mock-backend")]
#[command(about = "Stand-in backend service for the gateway", long_about = None)]
struct Cli {
    /// Name echoed in every response.
    #[arg(short, long, default_value = "user")]
    name: String,

    #[arg(short, long, default_value_t = 8001)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let app = Router::new()
        .fallback(hello)
        .with_state(cli.name.clone());

    let listener = TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    let local_addr: SocketAddr = listener.local_addr()?;
    tracing::info!(name = %cli.name, address = %local_addr, "Mock backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(sticky_gateway::lifecycle::shutdown_signal())
        .await?;
    Ok(())
}

async fn hello(State(name): State<String>) -> String {
    format!("Hello {name}!")
}
