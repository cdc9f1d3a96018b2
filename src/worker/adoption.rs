//! Connection adoption on the worker side.
//!
//! # Responsibilities
//! - Read handoff messages from the control channel
//! - Rebuild each transferred socket as a Tokio stream
//! - Feed adopted streams to the HTTP server alongside its own accepts
//!
//! # Design Decisions
//! - Adopted connections go through the same server as locally accepted
//!   ones, so there is exactly one code path for HTTP
//! - Order is preserved: connections reach the server in the order their
//!   handoffs were received
//! - Messages with an unknown tag are ignored; an attached descriptor is
//!   closed, never adopted

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::net::handoff::{into_tcp_stream, ControlChannel, HandoffError, Received};
use crate::observability::metrics;

/// Adopted connections waiting for the server to pick them up.
const ADOPTION_QUEUE: usize = 128;

/// Sending half of the adoption queue.
pub type Adopter = mpsc::Sender<(TcpStream, SocketAddr)>;

/// Listener that yields both local accepts and adopted connections.
///
/// The address reported for an adopted stream is the client's address as
/// observed by the master, so `ConnectInfo` carries the real peer.
#[derive(Debug)]
pub struct AdoptingListener {
    local: TcpListener,
    adopted: mpsc::Receiver<(TcpStream, SocketAddr)>,
    adopted_open: bool,
}

impl AdoptingListener {
    pub fn new(local: TcpListener) -> (Self, Adopter) {
        let (tx, rx) = mpsc::channel(ADOPTION_QUEUE);
        let listener = Self {
            local,
            adopted: rx,
            adopted_open: true,
        };
        (listener, tx)
    }
}

impl axum::serve::Listener for AdoptingListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            tokio::select! {
                biased;

                adopted = self.adopted.recv(), if self.adopted_open => match adopted {
                    Some(connection) => return connection,
                    None => self.adopted_open = false,
                },
                accepted = self.local.accept() => match accepted {
                    Ok(connection) => return connection,
                    Err(e) => handle_accept_error(e).await,
                },
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.local.local_addr()
    }
}

/// Client address of a connection served through an [`AdoptingListener`].
///
/// Extract it with `ConnectInfo<ClientAddr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, AdoptingListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, AdoptingListener>) -> Self {
        ClientAddr(*stream.remote_addr())
    }
}

async fn handle_accept_error(e: io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }
    tracing::error!(error = %e, "Local accept failed");
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// Drains the control channel into the adoption queue.
pub struct AdoptionHandler {
    channel: Arc<ControlChannel>,
    adopter: Adopter,
}

impl AdoptionHandler {
    pub fn new(channel: Arc<ControlChannel>, adopter: Adopter) -> Self {
        Self { channel, adopter }
    }

    /// Run until the master closes the channel.
    ///
    /// Returns `Ok(())` on a clean close; the caller then drains and exits.
    pub async fn run(self) -> Result<(), HandoffError> {
        loop {
            match self.channel.recv().await {
                Ok(Some(received)) => self.adopt(received).await,
                Ok(None) => {
                    tracing::info!("Control channel closed by master");
                    return Ok(());
                }
                Err(e @ (HandoffError::Codec(_) | HandoffError::TooLarge)) => {
                    tracing::warn!(error = %e, "Ignoring malformed control message");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn adopt(&self, received: Received) {
        let Received {
            message,
            connection,
        } = received;

        if !message.is_handoff() {
            // Dropping `connection` closes any attached socket.
            tracing::debug!(
                tag = %message.tag,
                closed_socket = connection.is_some(),
                "Ignoring control message"
            );
            return;
        }
        let Some(fd) = connection else {
            tracing::warn!("Handoff arrived without a socket");
            return;
        };

        let stream = match into_tcp_stream(fd) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to adopt socket");
                return;
            }
        };
        let Some(remote_addr) = message.remote_addr.or_else(|| stream.peer_addr().ok()) else {
            tracing::warn!("Adopted socket has no peer address, closing");
            return;
        };

        tracing::debug!(peer_addr = %remote_addr, "Connection adopted");
        metrics::record_adopted();

        // Reading resumes once the server task picks the stream up.
        if self.adopter.send((stream, remote_addr)).await.is_err() {
            tracing::warn!(peer_addr = %remote_addr, "Server stopped, closing adopted connection");
        }
    }
}
