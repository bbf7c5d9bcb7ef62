//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Detect duplicate node addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::BalancerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no backend nodes configured")]
    NoNodes,

    #[error("node #{index} has an empty host")]
    EmptyHost { index: usize },

    #[error("node #{index} ({host}) has port 0")]
    ZeroPort { index: usize, host: String },

    #[error("node {address} is listed more than once")]
    DuplicateNode { address: String },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("health_check.path must start with '/': {0}")]
    InvalidProbePath(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.nodes.is_empty() {
        errors.push(ValidationError::NoNodes);
    }

    let mut seen = HashSet::new();
    for (index, node) in config.nodes.iter().enumerate() {
        if node.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost { index });
        }
        if node.port == 0 {
            errors.push(ValidationError::ZeroPort {
                index,
                host: node.host.clone(),
            });
        }
        if !seen.insert((node.host.as_str(), node.port)) {
            errors.push(ValidationError::DuplicateNode {
                address: format!("{}:{}", node.host, node.port),
            });
        }
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::ZeroDuration { field: "health_check.interval_secs" });
    }
    if config.health_check.timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration { field: "health_check.timeout_secs" });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroDuration { field: "timeouts.connect_secs" });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroDuration { field: "timeouts.request_secs" });
    }
    if !config.health_check.path.starts_with('/') {
        errors.push(ValidationError::InvalidProbePath(config.health_check.path.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
