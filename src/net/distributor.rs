//! Master connection distributor.
//!
//! # Responsibilities
//! - Accept every connection on the public listener
//! - Pick the worker slot from the client IP fingerprint
//! - Transfer the raw socket to that worker over its control channel
//! - Drive the worker registry's lifecycle events
//!
//! # Design Decisions
//! - Protocol blind: nothing above TCP is inspected here
//! - Stateless after handoff; the master keeps no per-connection record
//! - Handoff failures drop the connection (no retry, no fallback worker)
//! - The loop never waits on a worker; each worker has its own bounded
//!   handoff queue, so one stalled worker cannot hold up the others

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::cluster::{WorkerEvent, WorkerRegistry, WorkerSpawner};
use crate::load_balancer::worker_index_for_ip;
use crate::net::listener::PublicListener;
use crate::observability::metrics;

/// Pause after a failed accept, so descriptor exhaustion cannot spin the loop.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// The master's event loop: public accepts plus worker lifecycle.
pub struct Distributor<S: WorkerSpawner> {
    listener: PublicListener,
    registry: WorkerRegistry<S>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl<S: WorkerSpawner> Distributor<S> {
    pub fn new(
        listener: PublicListener,
        registry: WorkerRegistry<S>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        Self {
            listener,
            registry,
            events,
        }
    }

    /// Worker slot for a client. Same IP, same slot, for the pool's lifetime.
    pub fn select_worker(&self, peer: SocketAddr) -> usize {
        worker_index_for_ip(peer.ip(), self.registry.pool_size())
    }

    /// Run until the shutdown signal fires, then release the pool.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(
                address = %addr,
                workers = self.registry.pool_size(),
                "Master distributing connections"
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Master received shutdown signal");
                    break;
                }
                Some(event) = self.events.recv() => {
                    self.registry.handle_event(event);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
            }
        }

        self.registry.shutdown();
    }

    /// Queue one accepted connection for its worker.
    ///
    /// Never waits on a worker: a full queue drops the connection.
    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        metrics::record_accepted();
        let index = self.select_worker(peer);

        let Some(worker) = self.registry.get(index) else {
            tracing::warn!(peer_addr = %peer, index, "Worker slot vacant, dropping connection");
            metrics::record_handoff_failure(index);
            return;
        };

        if let Err(e) = worker.hand_off(stream, peer) {
            tracing::warn!(
                peer_addr = %peer,
                index,
                generation = worker.generation(),
                error = %e,
                "Handoff failed, dropping connection"
            );
            metrics::record_handoff_failure(index);
        }
    }
}
