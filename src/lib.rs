//! Sticky-session HTTP gateway library.
//!
//! One master process owns the public port and hands every accepted
//! connection to a worker process chosen from the client IP. Workers run
//! the HTTP gateway: prefix routing to backend services.

// Master side
pub mod cluster;
pub mod load_balancer;
pub mod net;

// Worker side
pub mod http;
pub mod routing;
pub mod worker;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
