//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (ordered scan)
//!     → matcher.rs (raw prefix test)
//!     → Return: matched Route (upstream) or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[] (declaration order)
//!     → Parse target URLs into Upstream
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: first declared match wins, catch-all "/" last

pub mod matcher;
pub mod router;

pub use matcher::PathPrefixMatcher;
pub use router::{Route, RouteError, RouteTable, Upstream};
