//! Worker process pool (master side).
//!
//! # Data Flow
//! ```text
//! Startup:
//!     registry.start()
//!         → spawner.rs (control pair + re-exec `worker` subcommand)
//!         → worker.rs (Worker handle, state Starting)
//!
//! Worker lifecycle:
//!     "ready" notice on control channel → WorkerEvent::Online → Running
//!     process exit → WorkerEvent::Exited → respawn same slot
//!     spawn failure → delay → WorkerEvent::SpawnFailed → respawn same slot
//! ```
//!
//! # Design Decisions
//! - Fixed pool size; slot indexes are stable across respawns
//! - The registry is owned by the master's event loop, no locks

pub mod registry;
pub mod spawner;
pub mod worker;

pub use registry::{WorkerEvent, WorkerRegistry};
pub use spawner::{ProcessSpawner, SpawnError, SpawnedWorker, WorkerSpawner};
pub use worker::{ExitReason, Worker, WorkerState};
