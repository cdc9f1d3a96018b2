//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Master (distributor, registry) and workers (adoption, proxy) produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout, shared by master and workers
//!     → Metrics endpoint per process (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the worker's middleware to the backend
//! - Metrics are cheap (atomic increments) and off by default

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
