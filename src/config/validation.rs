//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing origins)
//! - Validate value ranges (limits > 0, statuses in range, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid listener bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
    #[error("duplicate origin name {0:?}")]
    DuplicateOrigin(String),
    #[error("origin {0:?} has no servers")]
    NoServers(String),
    #[error("origin {origin:?} server address {address:?} is not host:port")]
    InvalidServerAddress { origin: String, address: String },
    #[error("route {route:?} references unknown origin {origin:?}")]
    UnknownOrigin { route: String, origin: String },
    #[error("{field} must be greater than zero")]
    ZeroValue { field: String },
    #[error("{field} status {status} is outside 100..=599")]
    InvalidStatus { field: String, status: u16 },
    #[error("timeouts.read_ms ({read_ms}) exceeds timeouts.max_read_ms ({max_read_ms})")]
    ReadExceedsMax { read_ms: u64, max_read_ms: u64 },
}

fn non_zero(errors: &mut Vec<ValidationError>, field: impl Into<String>, value: u64) {
    if value == 0 {
        errors.push(ValidationError::ZeroValue { field: field.into() });
    }
}

fn status_in_range(errors: &mut Vec<ValidationError>, field: impl Into<String>, status: u16) {
    if !(100..=599).contains(&status) {
        errors.push(ValidationError::InvalidStatus {
            field: field.into(),
            status,
        });
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let mut origins = HashSet::new();
    for origin in &config.origins {
        if !origins.insert(origin.name.as_str()) {
            errors.push(ValidationError::DuplicateOrigin(origin.name.clone()));
        }
        if origin.servers.is_empty() {
            errors.push(ValidationError::NoServers(origin.name.clone()));
        }
        for server in &origin.servers {
            if server.address.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidServerAddress {
                    origin: origin.name.clone(),
                    address: server.address.clone(),
                });
            }
            non_zero(
                &mut errors,
                format!("origins.{}.servers.max_connections", origin.name),
                server.max_connections as u64,
            );
        }
        non_zero(
            &mut errors,
            format!("origins.{}.concurrency_limit", origin.name),
            origin.concurrency_limit as u64,
        );
    }

    for route in &config.routes {
        if !origins.contains(route.origin.as_str()) {
            errors.push(ValidationError::UnknownOrigin {
                route: route.name.clone(),
                origin: route.origin.clone(),
            });
        }
    }

    non_zero(&mut errors, "timeouts.connect_ms", config.timeouts.connect_ms);
    non_zero(&mut errors, "timeouts.read_ms", config.timeouts.read_ms);
    if config.timeouts.read_ms > config.timeouts.max_read_ms {
        errors.push(ValidationError::ReadExceedsMax {
            read_ms: config.timeouts.read_ms,
            max_read_ms: config.timeouts.max_read_ms,
        });
    }

    for status in &config.retries.retryable_statuses {
        status_in_range(&mut errors, "retries.retryable_statuses", *status);
    }
    non_zero(
        &mut errors,
        "retries.breaker_failure_threshold",
        u64::from(config.retries.breaker_failure_threshold),
    );

    non_zero(
        &mut errors,
        "filters.default_concurrency_limit",
        config.filters.default_concurrency_limit as u64,
    );
    for (name, limit) in &config.filters.concurrency_limits {
        non_zero(&mut errors, format!("filters.concurrency_limits.{name}"), *limit as u64);
    }
    for (filter_type, limit) in &config.filters.type_concurrency_limits {
        non_zero(
            &mut errors,
            format!("filters.type_concurrency_limits.{filter_type}"),
            *limit as u64,
        );
    }

    for (error_type, status) in &config.errors.status_overrides {
        status_in_range(&mut errors, format!("errors.status_overrides.{error_type}"), *status);
    }

    if config.load_shedding.enabled {
        non_zero(
            &mut errors,
            "load_shedding.active_request_threshold",
            config.load_shedding.active_request_threshold,
        );
    }
    if config.health_check.enabled {
        non_zero(&mut errors, "health_check.interval_secs", config.health_check.interval_secs);
        non_zero(&mut errors, "health_check.timeout_secs", config.health_check.timeout_secs);
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

    fn valid() -> ProxyConfig {
        toml::from_str(
            r#"
            [[origins]]
            name = "api"
            [[origins.servers]]
            address = "127.0.0.1:9001"

            [[routes]]
            name = "all"
            origin = "api"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid();
        config.routes[0].origin = "missing".to_string();
        config.origins[0].servers[0].address = "not-an-address".to_string();
        config.retries.retryable_statuses.push(999);
        config.filters.default_concurrency_limit = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::UnknownOrigin {
            route: "all".to_string(),
            origin: "missing".to_string(),
        }));
        assert!(errors.contains(&ValidationError::ZeroValue {
            field: "filters.default_concurrency_limit".to_string(),
        }));
    }
}
