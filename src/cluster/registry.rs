//! Worker pool registry.
//!
//! # Responsibilities
//! - Keep exactly one worker per slot `0..pool_size`
//! - Observe each worker's readiness and exit
//! - Respawn a slot immediately when its worker exits
//!
//! # Design Decisions
//! - Single writer: only the master's event loop mutates the table. Observer
//!   tasks never touch it; they post `WorkerEvent`s on a channel instead
//! - Respawn is unconditional and immediate, with no backoff or cap
//! - A failed spawn leaves the slot vacant and is reported back as an event
//!   after `spawn_retry_delay`, which triggers the next attempt
//! - Events carry the slot generation so late events from a replaced
//!   process are ignored

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::cluster::spawner::{SpawnedWorker, WorkerSpawner};
use crate::cluster::worker::{ExitReason, Worker, WorkerState};
use crate::net::handoff::ControlChannel;
use crate::observability::metrics;

/// Lifecycle notifications delivered to the registry's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The worker's server is ready to adopt connections.
    Online { index: usize, generation: u64 },
    /// The worker process is gone.
    Exited {
        index: usize,
        generation: u64,
        reason: ExitReason,
    },
    /// A spawn attempt failed and the retry delay has elapsed.
    SpawnFailed { index: usize, generation: u64 },
}

/// Fixed-size table of live workers, indexed by slot.
pub struct WorkerRegistry<S: WorkerSpawner> {
    spawner: S,
    slots: Vec<Option<Worker>>,
    generations: Vec<u64>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    spawn_retry_delay: Duration,
}

impl<S: WorkerSpawner> WorkerRegistry<S> {
    /// Create an empty registry. Call [`start`](Self::start) to fill it.
    ///
    /// The returned receiver must be drained by the owner and each event
    /// passed to [`handle_event`](Self::handle_event).
    pub fn new(
        pool_size: usize,
        spawner: S,
        spawn_retry_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            spawner,
            slots: (0..pool_size).map(|_| None).collect(),
            generations: vec![0; pool_size],
            events,
            spawn_retry_delay,
        };
        (registry, events_rx)
    }

    /// Spawn a worker for every slot.
    pub fn start(&mut self) {
        for index in 0..self.pool_size() {
            self.spawn(index);
        }
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Current worker at `index`, or `None` while the slot is vacant.
    ///
    /// Do not hold on to the result: the worker is replaced whenever its
    /// process exits.
    pub fn get(&self, index: usize) -> Option<&Worker> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Number of slots with a worker that has not exited.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|w| w.state() != WorkerState::Exited)
            .count()
    }

    /// Start a new worker in slot `index`, replacing whatever was there.
    pub fn spawn(&mut self, index: usize) {
        self.generations[index] += 1;
        let generation = self.generations[index];

        match self.spawner.spawn(index) {
            Ok(spawned) => {
                let worker = self.observe(index, generation, spawned);
                tracing::info!(
                    index,
                    generation,
                    pid = ?worker.pid(),
                    "Worker spawned"
                );
                self.slots[index] = Some(worker);
            }
            Err(e) => {
                tracing::error!(
                    index,
                    generation,
                    error = %e,
                    retry_in_ms = self.spawn_retry_delay.as_millis() as u64,
                    "Worker spawn failed, slot vacant"
                );
                self.slots[index] = None;
                let events = self.events.clone();
                let delay = self.spawn_retry_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(WorkerEvent::SpawnFailed { index, generation });
                });
            }
        }
        metrics::set_live_workers(self.live_count());
    }

    /// Apply a lifecycle event. Exits and failed spawns trigger a respawn.
    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Online { index, generation } => {
                if let Some(worker) = self.current_mut(index, generation) {
                    worker.set_state(WorkerState::Running);
                    tracing::info!(index, generation, pid = ?worker.pid(), "Worker online");
                }
            }
            WorkerEvent::Exited {
                index,
                generation,
                reason,
            } => {
                let Some(worker) = self.current_mut(index, generation) else {
                    tracing::debug!(index, generation, "Ignoring exit of a replaced worker");
                    return;
                };
                worker.set_state(WorkerState::Exited);
                tracing::warn!(
                    index,
                    generation,
                    pid = ?worker.pid(),
                    reason = %reason,
                    "Worker exited, respawning"
                );
                metrics::record_respawn(index);
                self.spawn(index);
            }
            WorkerEvent::SpawnFailed { index, generation } => {
                if self.generations.get(index) == Some(&generation) && self.slots[index].is_none() {
                    self.spawn(index);
                }
            }
        }
    }

    fn current_mut(&mut self, index: usize, generation: u64) -> Option<&mut Worker> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .filter(|w| w.generation() == generation)
    }

    /// Build the worker handle and start its observer task.
    ///
    /// The observer reads readiness notices until the worker exits or its
    /// handle is dropped, then releases the channel and waits for the exit.
    fn observe(&self, index: usize, generation: u64, spawned: SpawnedWorker) -> Worker {
        let SpawnedWorker {
            pid,
            channel,
            mut exited,
        } = spawned;
        let channel = Arc::new(channel);
        let events = self.events.clone();
        let notices = Arc::clone(&channel);
        let (retire, retired) = oneshot::channel();

        tokio::spawn(async move {
            tokio::select! {
                reason = &mut exited => {
                    let _ = events.send(WorkerEvent::Exited { index, generation, reason });
                    return;
                }
                _ = read_notices(index, generation, notices, &events) => {}
                _ = retired => {}
            }
            let reason = exited.await;
            let _ = events.send(WorkerEvent::Exited { index, generation, reason });
        });

        Worker::new(index, generation, pid, channel, retire)
    }

    /// Stop managing the pool.
    ///
    /// Dropping the handles closes every control channel; workers see the
    /// end-of-file and shut down gracefully.
    pub fn shutdown(self) {
        tracing::info!(workers = self.live_count(), "Releasing worker pool");
    }
}

/// Turn a worker's notices into events until its channel closes.
async fn read_notices(
    index: usize,
    generation: u64,
    channel: Arc<ControlChannel>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    loop {
        match channel.recv().await {
            Ok(Some(r)) if r.message.is_ready() => {
                let _ = events.send(WorkerEvent::Online { index, generation });
            }
            Ok(Some(r)) => {
                tracing::debug!(index, tag = %r.message.tag, "Ignoring worker message");
            }
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(index, error = %e, "Worker control channel failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::spawner::SpawnError;
    use crate::net::handoff::{control_pair, ControlMessage};
    use futures_util::FutureExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Workers that live in the test process. Each spawn leaves behind the
    /// worker's end of the channel and a trigger to "kill" it.
    #[derive(Clone, Default)]
    struct FakeSpawner {
        spawned: Arc<Mutex<HashMap<usize, Vec<FakeProcess>>>>,
        fail_next: Arc<Mutex<bool>>,
    }

    struct FakeProcess {
        channel: Arc<ControlChannel>,
        kill: Option<oneshot::Sender<ExitReason>>,
    }

    impl FakeSpawner {
        fn kill(&self, index: usize, reason: ExitReason) {
            let mut spawned = self.spawned.lock().unwrap();
            let process = spawned.get_mut(&index).and_then(|v| v.last_mut()).unwrap();
            process.kill.take().unwrap().send(reason).unwrap();
        }

        fn spawn_count(&self, index: usize) -> usize {
            self.spawned.lock().unwrap().get(&index).map_or(0, Vec::len)
        }
    }

    impl WorkerSpawner for FakeSpawner {
        fn spawn(&mut self, index: usize) -> Result<SpawnedWorker, SpawnError> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(SpawnError::Launch(std::io::Error::other("out of processes")));
            }
            let (master, worker) = control_pair().map_err(SpawnError::Channel)?;
            let (kill, killed) = oneshot::channel();
            self.spawned.lock().unwrap().entry(index).or_default().push(FakeProcess {
                channel: Arc::new(ControlChannel::new(worker).map_err(SpawnError::Channel)?),
                kill: Some(kill),
            });
            Ok(SpawnedWorker {
                pid: None,
                channel: ControlChannel::new(master).map_err(SpawnError::Channel)?,
                exited: killed
                    .map(|r| r.unwrap_or(ExitReason::Unknown("dropped".into())))
                    .boxed(),
            })
        }
    }

    #[tokio::test]
    async fn test_start_fills_every_slot() {
        let spawner = FakeSpawner::default();
        let (mut registry, _events) = WorkerRegistry::new(4, spawner.clone(), Duration::ZERO);
        registry.start();

        assert_eq!(registry.live_count(), 4);
        for index in 0..4 {
            let worker = registry.get(index).unwrap();
            assert_eq!(worker.index(), index);
            assert_eq!(worker.state(), WorkerState::Starting);
            assert_eq!(spawner.spawn_count(index), 1);
        }
    }

    #[tokio::test]
    async fn test_ready_marks_running() {
        let spawner = FakeSpawner::default();
        let (mut registry, mut events) = WorkerRegistry::new(1, spawner.clone(), Duration::ZERO);
        registry.start();

        let channel = Arc::clone(&spawner.spawned.lock().unwrap()[&0][0].channel);
        channel.send(&ControlMessage::ready(), None).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event, WorkerEvent::Online { index: 0, generation: 1 });
        registry.handle_event(event);
        assert_eq!(registry.get(0).unwrap().state(), WorkerState::Running);
    }

    #[tokio::test]
    async fn test_exit_respawns_same_slot() {
        let spawner = FakeSpawner::default();
        let (mut registry, mut events) = WorkerRegistry::new(3, spawner.clone(), Duration::ZERO);
        registry.start();

        spawner.kill(1, ExitReason::Signal(9));
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, WorkerEvent::Exited { index: 1, generation: 1, .. }));
        registry.handle_event(event);

        let worker = registry.get(1).unwrap();
        assert_eq!(worker.generation(), 2);
        assert_eq!(worker.state(), WorkerState::Starting);
        assert_eq!(spawner.spawn_count(1), 2);
        assert_eq!(registry.live_count(), 3);
        // Other slots untouched.
        assert_eq!(registry.get(0).unwrap().generation(), 1);
    }

    #[tokio::test]
    async fn test_clean_exit_also_respawns() {
        let spawner = FakeSpawner::default();
        let (mut registry, mut events) = WorkerRegistry::new(1, spawner.clone(), Duration::ZERO);
        registry.start();

        spawner.kill(0, ExitReason::Code(0));
        registry.handle_event(events.recv().await.unwrap());
        assert_eq!(registry.get(0).unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn test_stale_exit_ignored() {
        let spawner = FakeSpawner::default();
        let (mut registry, _events) = WorkerRegistry::new(1, spawner.clone(), Duration::ZERO);
        registry.start();

        registry.handle_event(WorkerEvent::Exited {
            index: 0,
            generation: 99,
            reason: ExitReason::Code(1),
        });
        assert_eq!(registry.get(0).unwrap().generation(), 1);
        assert_eq!(spawner.spawn_count(0), 1);
    }

    #[tokio::test]
    async fn test_failed_spawn_retried_by_event() {
        let spawner = FakeSpawner::default();
        *spawner.fail_next.lock().unwrap() = true;
        let (mut registry, mut events) =
            WorkerRegistry::new(1, spawner.clone(), Duration::from_millis(10));
        registry.start();

        assert!(registry.get(0).is_none());
        assert_eq!(registry.live_count(), 0);

        let event = events.recv().await.unwrap();
        assert_eq!(event, WorkerEvent::SpawnFailed { index: 0, generation: 1 });
        registry.handle_event(event);

        assert_eq!(registry.get(0).unwrap().generation(), 2);
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_control_channels() {
        let spawner = FakeSpawner::default();
        let (mut registry, _events) = WorkerRegistry::new(2, spawner.clone(), Duration::ZERO);
        registry.start();

        registry.shutdown();

        for index in 0..2 {
            let channel = Arc::clone(&spawner.spawned.lock().unwrap()[&index][0].channel);
            let closed = tokio::time::timeout(Duration::from_secs(1), channel.recv())
                .await
                .expect("control channel still open after shutdown");
            assert!(closed.unwrap().is_none());
        }
    }
}
