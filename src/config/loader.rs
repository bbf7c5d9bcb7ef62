//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{BalancerConfig, NodeConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },

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

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<BalancerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load a TOML file (or defaults when `path` is `None`), apply environment
/// overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<BalancerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => BalancerConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `SERVERS`, `PORT` and `NAME` overrides read through `lookup`.
///
/// `SERVERS` is a `;`-separated list of `host:port` entries and replaces the
/// configured node list. `PORT` rebinds the listener on all interfaces.
pub fn apply_env_overrides<F>(config: &mut BalancerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(servers) = lookup("SERVERS") {
        config.nodes = parse_servers(&servers)?;
    }

    if let Some(port) = lookup("PORT") {
        let port: u16 = port.trim().parse().map_err(|e| ConfigError::InvalidEnv {
            var: "PORT",
            reason: format!("{port:?}: {e}"),
        })?;
        config.listener.bind_address = format!("0.0.0.0:{port}");
    }

    if let Some(name) = lookup("NAME") {
        if !name.trim().is_empty() {
            config.name = name.trim().to_string();
        }
    }

    Ok(())
}

/// Parse `host:port;host:port` into node descriptors. Empty entries are skipped.
pub fn parse_servers(value: &str) -> Result<Vec<NodeConfig>, ConfigError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<NodeConfig, ConfigError> {
            let invalid = |reason: &str| ConfigError::InvalidEnv {
                var: "SERVERS",
                reason: format!("{entry:?}: {reason}"),
            };
            let (host, port) = entry.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
            let port = port.parse::<u16>().map_err(|e| invalid(&e.to_string()))?;
            Ok(NodeConfig {
                host: host.to_string(),
                port,
            })
        })
        .collect()
}
