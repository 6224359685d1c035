//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding the listener host.
pub const HOST_ENV: &str = "PROXY_HOST";
/// Environment variable overriding the listener port.
pub const PORT_ENV: &str = "PROXY_PORT";
/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "PROXY_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {name} value '{value}'")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `PROXY_HOST` / `PROXY_PORT` / `PROXY_LOG_LEVEL` on top of a config.
///
/// The lookup is injected so tests do not have to touch process state.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup(HOST_ENV);
    let port = lookup(PORT_ENV);

    if host.is_some() || port.is_some() {
        let (current_host, current_port) = split_host_port(&config.listener.bind_address);
        let host = host.unwrap_or(current_host);
        let port = match port {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Env {
                name: PORT_ENV,
                value: raw,
            })?,
            None => current_port,
        };
        config.listener.bind_address = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
    }

    if let Some(level) = lookup(LOG_LEVEL_ENV) {
        config.observability.log_level = level;
    }

    Ok(())
}

fn split_host_port(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => (
            host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port.parse().unwrap_or(8080),
        ),
        None => (address.to_string(), 8080),
    }
}
