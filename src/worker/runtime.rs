//! Worker process main loop.
//!
//! # Responsibilities
//! - Bind the worker's private loopback listener
//! - Start the gateway server on the adopting listener
//! - Announce readiness to the master
//! - Drain and exit when the master goes away or a signal arrives

use std::os::fd::RawFd;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::http::GatewayServer;
use crate::lifecycle::{shutdown_signal, Shutdown};
use crate::net::handoff::{ControlChannel, ControlMessage, HandoffError};
use crate::routing::RouteError;
use crate::worker::adoption::{AdoptingListener, AdoptionHandler};

/// Error type for worker startup and shutdown.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid control channel descriptor {fd}: {source}")]
    ControlFd {
        fd: RawFd,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind worker listener {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Routes(#[from] RouteError),

    #[error(transparent)]
    Control(#[from] HandoffError),

    #[error("HTTP server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// Entry point for a worker process started by the master.
pub async fn run_worker(config: GatewayConfig, control_fd: RawFd) -> Result<(), WorkerError> {
    let channel = ControlChannel::from_inherited(control_fd)
        .map_err(|source| WorkerError::ControlFd { fd: control_fd, source })?;
    serve_control_channel(config, channel, shutdown_signal()).await
}

/// Serve adopted connections from `channel` until the master closes it or
/// `stop` resolves.
///
/// Also usable for a worker hosted inside the current process.
pub async fn serve_control_channel<F>(
    config: GatewayConfig,
    channel: ControlChannel,
    stop: F,
) -> Result<(), WorkerError>
where
    F: std::future::Future<Output = ()> + Send,
{
    let address = config.cluster.worker_bind_address.clone();
    let local = TcpListener::bind(&address)
        .await
        .map_err(|source| WorkerError::Bind {
            address: address.clone(),
            source,
        })?;
    if let Ok(local_addr) = local.local_addr() {
        tracing::info!(address = %local_addr, "Worker listener bound");
    }

    let server = GatewayServer::new(&config)?;
    let shutdown = Shutdown::new();
    let channel = Arc::new(channel);
    let (listener, adopter) = AdoptingListener::new(local);
    let handler = AdoptionHandler::new(channel.clone(), adopter);

    let server_task = tokio::spawn(server.serve(listener, shutdown.wait()));
    channel.send(&ControlMessage::ready(), None).await?;
    tracing::info!("Worker ready");

    let outcome = tokio::select! {
        result = handler.run() => result,
        _ = stop => {
            tracing::info!("Worker stopping");
            Ok(())
        }
    };

    shutdown.trigger();
    match server_task.await {
        Ok(result) => result.map_err(WorkerError::Server)?,
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
    }
    tracing::info!("Worker exited");

    outcome.map_err(WorkerError::from)
}
