//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration shared by the master and every worker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public listener owned by the master.
    pub listener: ListenerConfig,

    /// Worker pool settings.
    pub cluster: ClusterConfig,

    /// Ordered route table. First matching prefix wins.
    pub routes: Vec<RouteConfig>,

    /// Upstream timeouts.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Error response formatting.
    pub errors: ErrorConfig,
}

impl GatewayConfig {
    /// Configuration with the stock route table (`/user`, `/post`, catch-all).
    pub fn with_default_routes() -> Self {
        Self {
            routes: default_routes(),
            ..Self::default()
        }
    }

    /// Number of workers to run, resolving "auto" to the host parallelism.
    pub fn pool_size(&self) -> usize {
        self.cluster.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// The route table used when neither the config file nor the caller supplies one.
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new("/user", "http://127.0.0.1:8001/"),
        RouteConfig::new("/post", "http://127.0.0.1:8002/"),
        RouteConfig::new("/", "http://127.0.0.1:8001/"),
    ]
}

/// Public listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Public TCP port.
    pub port: u16,
}

impl ListenerConfig {
    /// The `host:port` string handed to the socket bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Pool size. `None` means one worker per available CPU.
    pub workers: Option<usize>,

    /// Private address each worker's HTTP server binds. Must be loopback.
    pub worker_bind_address: String,

    /// Delay before a failed spawn is reported back to the registry loop.
    pub spawn_retry_delay_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: None,
            worker_bind_address: "127.0.0.1:0".to_string(),
            spawn_retry_delay_ms: 1000,
        }
    }
}

/// A single entry of the gateway route table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Raw string prefix matched against the request path.
    pub path_prefix: String,

    /// Base URL of the backend (e.g., "http://127.0.0.1:8001/").
    pub target: String,
}

impl RouteConfig {
    pub fn new(path_prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            target: target.into(),
        }
    }

    /// True for the "/" entry that matches every path.
    pub fn is_catch_all(&self) -> bool {
        self.path_prefix == "/"
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 5 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when `RUST_LOG` is unset (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Master metrics address. Worker `i` uses the same IP and port + 1 + i.
    pub metrics_address: SocketAddr,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// Error response configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ErrorConfig {
    /// Include the internal error chain in error bodies.
    pub expose_details: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            port = 8080

            [[routes]]
            path_prefix = "/"
            target = "http://127.0.0.1:9000/"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.routes.len(), 1);
        assert!(config.routes[0].is_catch_all());
        assert_eq!(config.cluster.worker_bind_address, "127.0.0.1:0");
    }

    #[test]
    fn test_default_routes_put_catch_all_last() {
        let routes = default_routes();
        assert_eq!(routes.len(), 3);
        assert!(routes.last().unwrap().is_catch_all());
        assert!(routes[..2].iter().all(|r| !r.is_catch_all()));
    }

    #[test]
    fn test_ipv6_bind_address() {
        let listener = ListenerConfig {
            host: "::".into(),
            port: 3000,
        };
        assert_eq!(listener.bind_address(), "[::]:3000");
    }

    #[test]
    fn test_explicit_pool_size() {
        let mut config = GatewayConfig::default();
        config.cluster.workers = Some(3);
        assert_eq!(config.pool_size(), 3);

        config.cluster.workers = None;
        assert!(config.pool_size() >= 1);
    }
}
