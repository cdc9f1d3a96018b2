//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::{default_routes, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name}={value:?} is invalid")]
    Env { name: &'static str, value: String },

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate.
///
/// With no path, the built-in defaults are used as the base layer.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => GatewayConfig::default(),
    };
    if config.routes.is_empty() {
        config.routes = default_routes();
    }

    apply_env(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn read_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply `PORT`, `WORKERS` and `ENVIRONMENT` on top of the file configuration.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("PORT") {
        config.listener.port = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { name: "PORT", value })?;
    }

    if let Some(value) = lookup("WORKERS") {
        let workers: usize = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { name: "WORKERS", value })?;
        config.cluster.workers = Some(workers);
    }

    if let Some(value) = lookup("ENVIRONMENT") {
        config.errors.expose_details = value.trim() == "development";
    }

    Ok(())
}
