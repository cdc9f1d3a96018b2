//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! Master control channel
//!     → adoption.rs (descriptor + remote address → TcpStream)
//!     → AdoptingListener (merged with the loopback listener's accepts)
//!     → crate::http::GatewayServer
//! ```
//!
//! # Design Decisions
//! - A worker serves only connections routed to it; its own loopback
//!   listener is never advertised
//! - Control channel EOF means the master is gone: drain and exit

pub mod adoption;
pub mod runtime;

pub use adoption::{Adopter, AdoptingListener, AdoptionHandler, ClientAddr};
pub use runtime::{run_worker, serve_control_channel, WorkerError};
