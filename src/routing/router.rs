//! Route lookup.
//!
//! # Responsibilities
//! - Store the compiled route table
//! - Look up the route for a request path
//! - Build the upstream URI for a matched route
//!
//! # Design Decisions
//! - Immutable after construction (shared via Arc without locks)
//! - O(n) scan in declaration order; first match wins
//! - Explicit no-match rather than a silent default

use axum::http::uri::{Authority, Scheme};
use axum::http::Uri;
use thiserror::Error;
use url::Url;

use crate::config::RouteConfig;
use crate::routing::matcher::PathPrefixMatcher;

/// Error type for route table compilation.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route {prefix:?}: invalid target {target:?}: {reason}")]
    InvalidTarget {
        prefix: String,
        target: String,
        reason: String,
    },
}

/// A backend base address, pre-split for request rewriting.
#[derive(Debug, Clone)]
pub struct Upstream {
    authority: Authority,
    base_path: String,
    url: String,
}

impl Upstream {
    /// Parse an absolute `http://host[:port][/base]` URL.
    pub fn parse(target: &str) -> Result<Self, String> {
        let url = Url::parse(target).map_err(|e| e.to_string())?;
        if url.scheme() != "http" {
            return Err(format!("unsupported scheme {:?}", url.scheme()));
        }
        let host = url.host().ok_or("missing host")?;
        let port = url.port_or_known_default().unwrap_or(80);
        let authority = format!("{}:{}", host, port)
            .parse::<Authority>()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
            url: target.to_string(),
        })
    }

    /// Upstream URI for an incoming path and query, with the base path
    /// prepended.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, axum::http::Error> {
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(format!("{}{}", self.base_path, path_and_query))
            .build()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// The target as configured, for logs and metrics.
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

/// One compiled entry of the route table.
#[derive(Debug, Clone)]
pub struct Route {
    pub matcher: PathPrefixMatcher,
    pub upstream: Upstream,
}

/// Ordered, immutable route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile the table from configuration, keeping declaration order.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, RouteError> {
        let routes = configs
            .iter()
            .map(|config| {
                let upstream =
                    Upstream::parse(&config.target).map_err(|reason| RouteError::InvalidTarget {
                        prefix: config.path_prefix.clone(),
                        target: config.target.clone(),
                        reason,
                    })?;
                Ok(Route {
                    matcher: PathPrefixMatcher::new(config.path_prefix.clone()),
                    upstream,
                })
            })
            .collect::<Result<Vec<_>, RouteError>>()?;

        Ok(Self { routes })
    }

    /// First declared route whose prefix matches `path`.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::from_config(&[
            RouteConfig::new("/user", "http://127.0.0.1:8001/"),
            RouteConfig::new("/post", "http://127.0.0.1:8002/"),
            RouteConfig::new("/", "http://127.0.0.1:8001/"),
        ])
        .unwrap()
    }

    #[test]
    fn test_first_declared_match_wins() {
        let table = table();
        assert_eq!(table.match_path("/post/5").unwrap().upstream.as_str(), "http://127.0.0.1:8002/");
        assert_eq!(table.match_path("/user/7").unwrap().matcher.prefix(), "/user");
        assert_eq!(table.match_path("/other").unwrap().matcher.prefix(), "/");
    }

    #[test]
    fn test_declaration_order_not_length() {
        let table = RouteTable::from_config(&[
            RouteConfig::new("/api", "http://127.0.0.1:9001/"),
            RouteConfig::new("/api/v2", "http://127.0.0.1:9002/"),
        ])
        .unwrap();
        assert_eq!(table.match_path("/api/v2/items").unwrap().matcher.prefix(), "/api");
    }

    #[test]
    fn test_no_match_without_catch_all() {
        let table = RouteTable::from_config(&[RouteConfig::new("/user", "http://127.0.0.1:8001/")])
            .unwrap();
        assert!(table.match_path("/post/1").is_none());
    }

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let upstream = Upstream::parse("http://localhost:8001/").unwrap();
        let uri = upstream.uri_for("/user/1?expand=true").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:8001/user/1?expand=true");
    }

    #[test]
    fn test_upstream_base_path_prepended() {
        let upstream = Upstream::parse("http://10.0.0.5:9000/svc/").unwrap();
        assert_eq!(upstream.uri_for("/post/5").unwrap().to_string(), "http://10.0.0.5:9000/svc/post/5");
    }

    #[test]
    fn test_upstream_default_port_and_ipv6() {
        assert_eq!(Upstream::parse("http://backend/").unwrap().authority().as_str(), "backend:80");
        assert_eq!(Upstream::parse("http://[::1]:8001/").unwrap().authority().as_str(), "[::1]:8001");
    }

    #[test]
    fn test_invalid_target_rejected() {
        let err = RouteTable::from_config(&[RouteConfig::new("/", "https://example.com/")]).unwrap_err();
        assert!(matches!(err, RouteError::InvalidTarget { .. }));
    }
}
