//! Worker process creation.
//!
//! # Responsibilities
//! - Create the control channel for a new worker
//! - Launch the worker process with its end of the channel inherited
//! - Expose the process exit as a future for the registry to observe
//!
//! # Design Decisions
//! - Workers are the same executable re-run with the hidden `worker`
//!   subcommand, so master and workers always share one build
//! - The registry only sees the `WorkerSpawner` trait; tests substitute
//!   in-process workers without forking

use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::process::Command;

use crate::cluster::worker::ExitReason;
use crate::net::handoff::{clear_cloexec, control_pair, ControlChannel};

/// Error type for worker spawning.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to create control channel: {0}")]
    Channel(#[source] std::io::Error),

    #[error("failed to launch worker process: {0}")]
    Launch(#[source] std::io::Error),

    #[error("cannot locate the gateway executable: {0}")]
    Executable(#[source] std::io::Error),
}

/// Everything the registry needs from a freshly started worker.
pub struct SpawnedWorker {
    pub pid: Option<u32>,
    /// Master's end of the control channel.
    pub channel: ControlChannel,
    /// Resolves once the worker is gone.
    pub exited: BoxFuture<'static, ExitReason>,
}

/// Creates workers for the registry.
pub trait WorkerSpawner: Send + 'static {
    fn spawn(&mut self, index: usize) -> Result<SpawnedWorker, SpawnError>;
}

/// Spawns workers by re-executing a gateway binary.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            config_path,
        }
    }

    /// Spawner for the currently running executable.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self, SpawnError> {
        let program = std::env::current_exe().map_err(SpawnError::Executable)?;
        Ok(Self::new(program, config_path))
    }

    fn command(&self, index: usize, control_fd: i32) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.arg("worker")
            .arg("--index")
            .arg(index.to_string())
            .arg("--control-fd")
            .arg(control_fd.to_string())
            .stdin(Stdio::null());
        cmd
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&mut self, index: usize) -> Result<SpawnedWorker, SpawnError> {
        let (master_end, worker_end) = control_pair().map_err(SpawnError::Channel)?;
        let child_fd = worker_end.as_raw_fd();

        let mut cmd = self.command(index, child_fd);
        // SAFETY: the hook runs between fork and exec and only calls fcntl,
        // which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || clear_cloexec(child_fd));
        }

        let mut child = cmd.spawn().map_err(SpawnError::Launch)?;
        // The child holds its own copy now.
        drop(worker_end);

        let channel = ControlChannel::new(master_end).map_err(SpawnError::Channel)?;
        let pid = child.id();
        let exited = async move {
            match child.wait().await {
                Ok(status) => ExitReason::from(status),
                Err(e) => ExitReason::Unknown(e.to_string()),
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            pid,
            channel,
            exited,
        })
    }
}
