//! Worker handle and lifecycle state.

use std::fmt;
use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::net::handoff::{ControlChannel, HandoffError};
use crate::observability::metrics;

/// Accepted connections that may wait for one worker's control channel.
pub const HANDOFF_QUEUE: usize = 64;

/// Lifecycle state of a worker slot's current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process launched, server not yet reported ready.
    Starting,
    /// Worker reported its server is adopting connections.
    Running,
    /// Process is gone; the slot is about to be refilled.
    Exited,
}

/// Why a worker process went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(i32),
    /// The exit status could not be collected.
    Unknown(String),
}

impl From<ExitStatus> for ExitReason {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitReason::Code(code),
            (None, Some(signal)) => ExitReason::Signal(signal),
            (None, None) => ExitReason::Unknown(status.to_string()),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Code(code) => write!(f, "exit code {}", code),
            ExitReason::Signal(signal) => write!(f, "signal {}", signal),
            ExitReason::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

/// A live worker bound to a slot of the pool.
///
/// The index is part of the routing contract; the process behind it
/// changes every time the slot is respawned.
///
/// Handoffs go through a bounded queue drained by a forwarding task, so a
/// worker that stops reading its control channel only ever stalls its own
/// queue. Dropping the handle ends the forwarding task and signals the
/// registry's observer to let go of the channel.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    generation: u64,
    pid: Option<u32>,
    state: WorkerState,
    handoffs: mpsc::Sender<(TcpStream, SocketAddr)>,
    _retire: oneshot::Sender<()>,
}

impl Worker {
    /// Must be called inside a Tokio runtime.
    pub(crate) fn new(
        index: usize,
        generation: u64,
        pid: Option<u32>,
        channel: Arc<ControlChannel>,
        retire: oneshot::Sender<()>,
    ) -> Self {
        let (handoffs, pending) = mpsc::channel(HANDOFF_QUEUE);
        tokio::spawn(forward_handoffs(index, generation, channel, pending));

        Self {
            index,
            generation,
            pid,
            state: WorkerState::Starting,
            handoffs,
            _retire: retire,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Spawn counter of this slot; distinguishes successive processes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    /// Queue an accepted connection for this worker without waiting.
    ///
    /// On error the connection has been dropped, which closes it.
    pub fn hand_off(&self, connection: TcpStream, remote_addr: SocketAddr) -> Result<(), HandoffError> {
        self.handoffs
            .try_send((connection, remote_addr))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HandoffError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => HandoffError::Closed,
            })
    }
}

/// Drain one worker's handoff queue into its control channel, in order.
async fn forward_handoffs(
    index: usize,
    generation: u64,
    channel: Arc<ControlChannel>,
    mut pending: mpsc::Receiver<(TcpStream, SocketAddr)>,
) {
    while let Some((connection, remote_addr)) = pending.recv().await {
        match channel.send_connection(connection, remote_addr).await {
            Ok(()) => {
                tracing::debug!(peer_addr = %remote_addr, index, "Connection handed off");
                metrics::record_handoff(index);
            }
            Err(e) => {
                tracing::warn!(
                    peer_addr = %remote_addr,
                    index,
                    generation,
                    error = %e,
                    "Handoff failed, dropping connection"
                );
                metrics::record_handoff_failure(index);
            }
        }
    }
}
