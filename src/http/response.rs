//! Response handling and gateway errors.
//!
//! # Responsibilities
//! - Pass backend responses through as streams
//! - Map gateway failures to HTTP status codes with a JSON body
//!
//! # Design Decisions
//! - Unmatched path: 404; unreachable or failing backend: 502
//! - `details` carries the error chain only when explicitly exposed
//!   (development mode); otherwise it is an empty string

use std::error::Error as StdError;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hyper::body::Incoming;
use serde::Serialize;
use thiserror::Error;

use crate::http::request::strip_hop_by_hop;

/// Failures produced by the gateway itself, not by a backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches {path}")]
    NoRoute { path: String },

    #[error("cannot build upstream request for {target}")]
    InvalidUpstream {
        target: String,
        #[source]
        source: axum::http::Error,
    },

    #[error("upstream {target} request failed")]
    Upstream {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

/// JSON error body returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub details: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::InvalidUpstream { .. } | GatewayError::Upstream { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Render the error; the error chain is included only if `expose_details`.
    pub fn into_response_with(self, expose_details: bool) -> Response {
        let status = self.status();
        let body = ErrorBody {
            message: status.canonical_reason().unwrap_or("Error").to_string(),
            details: if expose_details {
                error_chain(&self)
            } else {
                String::new()
            },
        };
        (status, Json(body)).into_response()
    }
}

fn error_chain(error: &dyn StdError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Turn a backend response into a client response.
///
/// Status, end-to-end headers and body are passed through unchanged.
pub fn from_upstream(response: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
