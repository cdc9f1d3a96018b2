//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Master:
//!     SIGTERM/SIGINT → Shutdown → distributor stops accepting
//!         → worker control channels closed → workers drain and exit
//!
//! Worker:
//!     control channel EOF or SIGTERM/SIGINT → Shutdown
//!         → HTTP server stops accepting → in-flight requests finish → exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config, logging, metrics, then listeners
//! - Ordered shutdown: stop accept, drain, close

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
