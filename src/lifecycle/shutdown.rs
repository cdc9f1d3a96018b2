//! Shutdown coordination for master and worker processes.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// In the master it stops the distributor; in a worker it stops the HTTP
/// server from taking new connections while in-flight ones drain.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Future that resolves once shutdown is triggered.
    ///
    /// Also resolves if the coordinator is dropped.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let waiting = shutdown.wait();

        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
        waiting.await;
    }

    #[tokio::test]
    async fn test_wait_resolves_when_dropped() {
        let shutdown = Shutdown::new();
        let waiting = shutdown.wait();
        drop(shutdown);
        waiting.await;
    }
}
