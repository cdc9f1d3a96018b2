//! Public TCP listener owned by the master.
//!
//! # Responsibilities
//! - Bind the public address
//! - Accept incoming TCP connections without reading from them
//!
//! # Design Decisions
//! - The master never polls an accepted socket for reads; the kernel keeps
//!   any client bytes queued until the adopting worker reads them

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// The single internet-facing listener of the process group.
#[derive(Debug)]
pub struct PublicListener {
    inner: TcpListener,
}

impl PublicListener {
    /// Bind to the configured public address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address = config.bind_address();
        let inner = TcpListener::bind(&address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        if let Ok(local_addr) = inner.local_addr() {
            tracing::info!(address = %local_addr, "Public listener bound");
        }
        Ok(Self { inner })
    }

    /// Wrap an already bound listener.
    pub fn from_tokio(inner: TcpListener) -> Self {
        Self { inner }
    }

    /// Accept the next connection. Cancel safe.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::trace!(peer_addr = %peer, "Connection accepted");
        Ok((stream, peer))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}
