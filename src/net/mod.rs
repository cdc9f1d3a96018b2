//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Master:
//!     Incoming TCP connection
//!         → listener.rs (public accept)
//!         → distributor.rs (fingerprint → worker slot)
//!         → handoff.rs (SCM_RIGHTS over the worker's control channel)
//!
//! Worker:
//!     handoff.rs (receive descriptor + remote address)
//!         → crate::worker::adoption (rebuild stream, feed HTTP server)
//! ```
//!
//! # Design Decisions
//! - The master never reads application bytes
//! - One control channel per worker; no shared queue between workers

pub mod distributor;
pub mod handoff;
pub mod listener;

pub use distributor::Distributor;
pub use handoff::{ControlChannel, ControlMessage, HandoffError};
pub use listener::{ListenerError, PublicListener};
