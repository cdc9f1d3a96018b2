//! HTTP protocol handling subsystem (worker side).
//!
//! # Data Flow
//! ```text
//! Adopted or local TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → routing (first matching prefix)
//!     → request.rs (rewrite URI, strip hop-by-hop, X-Forwarded-For)
//!     → upstream backend
//!     → response.rs (stream back, or JSON error)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{ErrorBody, GatewayError};
pub use server::{AppState, GatewayServer};
