//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool size > 0, loopback worker address)
//! - Check the route table is deterministic (single catch-all, declared last)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cluster.workers must be at least 1")]
    EmptyPool,

    #[error("cluster.worker_bind_address {0:?} is not a socket address")]
    InvalidWorkerAddress(String),

    #[error("cluster.worker_bind_address {0} is not a loopback address")]
    PublicWorkerAddress(SocketAddr),

    #[error("at least one route is required")]
    NoRoutes,

    #[error("route #{index}: prefix {prefix:?} must start with '/'")]
    InvalidPrefix { index: usize, prefix: String },

    #[error("route #{index}: target {target:?} is not an absolute http URL")]
    InvalidTarget { index: usize, target: String },

    #[error("route #{index}: catch-all '/' declared more than once")]
    DuplicateCatchAll { index: usize },

    #[error("route #{index}: catch-all '/' must be the last route")]
    CatchAllNotLast { index: usize },
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cluster.workers == Some(0) {
        errors.push(ValidationError::EmptyPool);
    }

    match config.cluster.worker_bind_address.parse::<SocketAddr>() {
        Ok(addr) if !addr.ip().is_loopback() => {
            errors.push(ValidationError::PublicWorkerAddress(addr));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::InvalidWorkerAddress(
            config.cluster.worker_bind_address.clone(),
        )),
    }

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    let last = config.routes.len().saturating_sub(1);
    let mut seen_catch_all = false;
    for (index, route) in config.routes.iter().enumerate() {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                index,
                prefix: route.path_prefix.clone(),
            });
        }

        let target_ok = Url::parse(&route.target)
            .map(|u| u.scheme() == "http" && u.host().is_some())
            .unwrap_or(false);
        if !target_ok {
            errors.push(ValidationError::InvalidTarget {
                index,
                target: route.target.clone(),
            });
        }

        if route.is_catch_all() {
            if seen_catch_all {
                errors.push(ValidationError::DuplicateCatchAll { index });
            } else if index != last {
                errors.push(ValidationError::CatchAllNotLast { index });
            }
            seen_catch_all = true;
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    #[test]
    fn test_default_routes_are_valid() {
        assert_eq!(validate_config(&GatewayConfig::with_default_routes()), Ok(()));
    }

    #[test]
    fn test_catch_all_must_be_last() {
        let mut config = GatewayConfig::default();
        config.routes = vec![
            RouteConfig::new("/", "http://127.0.0.1:8001/"),
            RouteConfig::new("/post", "http://127.0.0.1:8002/"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::CatchAllNotLast { index: 0 }]);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.cluster.workers = Some(0);
        config.cluster.worker_bind_address = "0.0.0.0:0".into();
        config.routes = vec![
            RouteConfig::new("user", "http://127.0.0.1:8001/"),
            RouteConfig::new("/post", "ftp://127.0.0.1/"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::EmptyPool));
        assert!(errors.contains(&ValidationError::InvalidPrefix {
            index: 0,
            prefix: "user".into()
        }));
    }

    #[test]
    fn test_empty_route_table() {
        let config = GatewayConfig::default();
        assert_eq!(validate_config(&config), Err(vec![ValidationError::NoRoutes]));
    }
}
