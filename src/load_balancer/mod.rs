//! Sticky worker selection.
//!
//! # Data Flow
//! ```text
//! Accepted connection (peer IP)
//!     → fingerprint.rs (canonical IP → stable u32)
//!     → hash % pool_size
//!     → worker slot index
//! ```
//!
//! # Design Decisions
//! - Address-based only; worker health never changes the mapping
//! - Pool size fixed for the process lifetime, so no rebalancing
//! - Non-cryptographic: this runs once per TCP connection

pub mod fingerprint;

pub use fingerprint::{fingerprint_ip, hash, worker_index, worker_index_for_ip};
