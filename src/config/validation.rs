//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Required values present (backend target, node name)
//! - Header names are legal and pairwise distinct
//! - Validate value ranges (timeouts > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use axum::http::HeaderName;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("header name for {field} is not a valid HTTP header name: {value:?}")]
    InvalidHeaderName { field: &'static str, value: String },

    #[error("header {value:?} is configured for both {first} and {second}")]
    DuplicateHeaderName {
        first: &'static str,
        second: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("listener.bind_addresses contains an invalid IP address: {0:?}")]
    InvalidBindAddress(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backend.trim().is_empty() {
        errors.push(ValidationError::Missing("backend"));
    }
    if config.node_name.trim().is_empty() {
        errors.push(ValidationError::Missing("node_name"));
    }

    let headers = [
        ("headers.email", &config.headers.email),
        ("headers.user", &config.headers.user),
        ("headers.network", &config.headers.network),
        ("headers.name", &config.headers.name),
    ];
    let mut seen: Vec<(&'static str, HeaderName)> = Vec::with_capacity(headers.len());
    for (field, value) in headers {
        match HeaderName::from_bytes(value.as_bytes()) {
            Ok(name) => {
                if let Some(first) = seen
                    .iter()
                    .find(|(_, other)| *other == name)
                    .map(|(first, _)| *first)
                {
                    errors.push(ValidationError::DuplicateHeaderName {
                        first,
                        second: field,
                        value: value.clone(),
                    });
                } else {
                    seen.push((field, name));
                }
            }
            Err(_) => errors.push(ValidationError::InvalidHeaderName {
                field,
                value: value.clone(),
            }),
        }
    }

    let positive = [
        ("identity.tunnel_lookup_timeout_ms", config.identity.tunnel_lookup_timeout_ms),
        ("identity.http_lookup_timeout_ms", config.identity.http_lookup_timeout_ms),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("listener.handshake_timeout_secs", config.listener.handshake_timeout_secs),
        ("overlay.join_timeout_secs", config.overlay.join_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    for addr in &config.listener.bind_addresses {
        if addr.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress(addr.clone()));
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

    fn valid() -> ProxyConfig {
        ProxyConfig {
            backend: "localhost:8080".to_string(),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn default_with_backend_is_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn missing_backend_is_reported() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::Missing("backend")]);
    }

    #[test]
    fn collects_every_problem() {
        let mut config = valid();
        config.node_name = " ".to_string();
        config.headers.user = "bad header".to_string();
        config.timeouts.connect_secs = 0;
        config.listener.bind_addresses = vec!["not-an-ip".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Missing("node_name")));
        assert!(errors.contains(&ValidationError::Zero("timeouts.connect_secs")));
        assert!(errors.contains(&ValidationError::InvalidBindAddress("not-an-ip".to_string())));
    }

    #[test]
    fn header_names_compare_case_insensitively() {
        let mut config = valid();
        config.headers.name = "x-webauth-user".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateHeaderName {
                first: "headers.user",
                second: "headers.name",
                value: "x-webauth-user".to_string(),
            }]
        );
    }
}
