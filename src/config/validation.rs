//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, ports distinct)
//! - Check addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControllerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use crate::config::schema::ControllerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port {port} is used by both {first} and {second}")]
    PortCollision {
        port: u16,
        first: &'static str,
        second: &'static str,
    },

    #[error("{0} must not be zero")]
    Zero(&'static str),

    #[error("invalid bind address {0:?}")]
    BindAddress(String),

    #[error("invalid socket address for {field}: {value:?}")]
    SocketAddress { field: &'static str, value: String },

    #[error("worker binary path is empty")]
    EmptyBinary,

    #[error("retry base delay exceeds max delay")]
    RetryDelays,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ControllerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listen = &config.listen;

    let mut ports: Vec<(&'static str, u16)> = vec![
        ("http_port", listen.http_port),
        ("https_port", listen.https_port),
        ("status_port", listen.status_port),
        ("default_server_port", listen.default_server_port),
    ];
    if config.passthrough.enabled {
        ports.push(("ssl_proxy_port", listen.ssl_proxy_port));
    }

    let mut seen: HashMap<u16, &'static str> = HashMap::new();
    for (name, port) in ports {
        if port == 0 {
            errors.push(ValidationError::Zero(name));
            continue;
        }
        if let Some(first) = seen.insert(port, name) {
            errors.push(ValidationError::PortCollision {
                port,
                first,
                second: name,
            });
        }
    }

    for addr in &listen.bind_addresses {
        if addr.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>().is_err() {
            errors.push(ValidationError::BindAddress(addr.clone()));
        }
    }

    if listen.health_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::SocketAddress {
            field: "health_address",
            value: listen.health_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::SocketAddress {
            field: "metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.worker.binary.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyBinary);
    }

    if !(config.queue.sync_rate_limit > 0.0) {
        errors.push(ValidationError::Zero("sync_rate_limit"));
    }
    if config.queue.burst == 0 {
        errors.push(ValidationError::Zero("burst"));
    }
    if config.queue.retry_base_delay_ms > config.queue.retry_max_delay_ms {
        errors.push(ValidationError::RetryDelays);
    }
    if config.controller.event_buffer == 0 {
        errors.push(ValidationError::Zero("event_buffer"));
    }
    if config.controller.janitor_interval_secs == 0 {
        errors.push(ValidationError::Zero("janitor_interval_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
