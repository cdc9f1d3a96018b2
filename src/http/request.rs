//! Request handling and transformation.
//!
//! # Responsibilities
//! - Attach a request ID (UUID v4) when the client did not send one
//! - Build the upstream request from the client request
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing, and forwarded to
//!   the backend with the other end-to-end headers
//! - Body is passed through as a stream, never buffered
//! - Hop-by-hop headers and `Host` are not forwarded; the client sets
//!   `Host` from the upstream authority

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use axum::http::{HeaderMap, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::routing::Upstream;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers scoped to a single connection (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Layer that generates `x-request-id` when missing.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer that copies `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    // "upgrade" is hop-by-hop too, but only meaningful with Connection.
    headers.remove("upgrade");
}

/// Append the client IP to `X-Forwarded-For`.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: SocketAddr) {
    let ip = client.ip().to_canonical().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Rewrite a client request into a request for `upstream`.
pub fn build_upstream_request(
    request: Request<Body>,
    upstream: &Upstream,
    client: SocketAddr,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = upstream.uri_for(path_and_query)?;

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(HOST);
    append_forwarded_for(&mut parts.headers, client);

    Ok(Request::from_parts(parts, body))
}
