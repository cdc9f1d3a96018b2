//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use sticky_gateway::cluster::{ExitReason, SpawnError, SpawnedWorker, WorkerRegistry, WorkerSpawner};
use sticky_gateway::config::GatewayConfig;
use sticky_gateway::lifecycle::Shutdown;
use sticky_gateway::net::handoff::{control_pair, ControlChannel};
use sticky_gateway::net::{Distributor, PublicListener};
use sticky_gateway::worker::serve_control_channel;

/// Start a simple mock backend that answers `<name> <path>` to any request.
///
/// Returns the bound address, so `addr` may use port 0.
pub async fn start_mock_backend(addr: SocketAddr, name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let path = read_request_path(&mut socket).await;
                        let body = format!("{} {}", name, path);
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    local_addr
}

/// Read the request head and return the request target of its first line.
async fn read_request_path(socket: &mut tokio::net::TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head)
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
        .to_string()
}

/// Workers that run inside the test process as tasks.
///
/// Each spawned worker serves the real adoption path and gateway server;
/// `stop` makes the latest worker in a slot exit like a crashed process.
#[derive(Clone)]
pub struct InProcessSpawner {
    config: GatewayConfig,
    stops: Arc<Mutex<HashMap<usize, Vec<Option<oneshot::Sender<()>>>>>>,
}

impl InProcessSpawner {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            stops: Arc::default(),
        }
    }

    /// Stop the current worker of `index`.
    pub fn stop(&self, index: usize) {
        let mut stops = self.stops.lock().unwrap();
        if let Some(stop) = stops.get_mut(&index).and_then(|v| v.last_mut()).and_then(Option::take) {
            let _ = stop.send(());
        }
    }

    /// How many workers have been started for `index`.
    pub fn spawn_count(&self, index: usize) -> usize {
        self.stops.lock().unwrap().get(&index).map_or(0, Vec::len)
    }
}

impl WorkerSpawner for InProcessSpawner {
    fn spawn(&mut self, index: usize) -> Result<SpawnedWorker, SpawnError> {
        let (master, worker) = control_pair().map_err(SpawnError::Channel)?;
        let worker = ControlChannel::new(worker).map_err(SpawnError::Channel)?;
        let (stop, stopped) = oneshot::channel();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            serve_control_channel(config, worker, async move {
                let _ = stopped.await;
            })
            .await
        });
        self.stops.lock().unwrap().entry(index).or_default().push(Some(stop));

        Ok(SpawnedWorker {
            pid: None,
            channel: ControlChannel::new(master).map_err(SpawnError::Channel)?,
            exited: async move {
                match task.await {
                    Ok(Ok(())) => ExitReason::Code(0),
                    Ok(Err(e)) => ExitReason::Unknown(e.to_string()),
                    Err(e) => ExitReason::Unknown(e.to_string()),
                }
            }
            .boxed(),
        })
    }
}

/// A master with in-process workers, listening on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub spawner: InProcessSpawner,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig, pool_size: usize) -> TestGateway {
    let listener = PublicListener::from_tokio(TcpListener::bind("127.0.0.1:0").await.unwrap());
    let addr = listener.local_addr().unwrap();

    let spawner = InProcessSpawner::new(config);
    let (mut registry, events) =
        WorkerRegistry::new(pool_size, spawner.clone(), Duration::from_millis(50));
    registry.start();

    let shutdown = Shutdown::new();
    let distributor = Distributor::new(listener, registry, events);
    tokio::spawn(distributor.run(shutdown.subscribe()));

    TestGateway {
        addr,
        spawner,
        shutdown,
    }
}

/// Client that opens a fresh connection per request, so every request is
/// a new handoff.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `f` until it yields `Some`, or panic after `timeout`.
pub async fn eventually<T, F, Fut>(timeout: Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = f().await {
            return value;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
