//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing backend groups)
//! - Check secret material when credentials are verified
//! - Check the usage service URL when usage limits are enabled
//! - Reject zero timeouts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::GatewayConfig;

/// Minimum HMAC secret length in bytes (256 bits).
pub const MIN_SECRET_BYTES: usize = 32;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("route '{route}' references unknown backend group '{group}'")]
    UnknownBackendGroup { route: String, group: String },
    #[error("backend '{backend}' has invalid address '{address}'")]
    InvalidBackendAddress { backend: String, address: String },
    #[error("jwt_secret must be at least 32 bytes, got {0}")]
    WeakSecret(usize),
    #[error("gateway_token must not be empty when routes authenticate")]
    MissingGatewayToken,
    #[error("usage service base_url '{0}' is not an absolute http(s) URL")]
    InvalidUsageServiceUrl(String),
    #[error("route '{0}' enables usage limiting with a blank action")]
    BlankUsageAction(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let groups: HashSet<&str> = config.backends.iter().map(|b| b.group.as_str()).collect();

    for backend in &config.backends {
        if backend.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBackendAddress {
                backend: backend.name.clone(),
                address: backend.address.clone(),
            });
        }
    }

    for route in &config.routes {
        if !groups.contains(route.backend_group.as_str()) {
            errors.push(ValidationError::UnknownBackendGroup {
                route: route.name.clone(),
                group: route.backend_group.clone(),
            });
        }
        if route.usage_limit.enabled && route.usage_limit.action.trim().is_empty() {
            errors.push(ValidationError::BlankUsageAction(route.name.clone()));
        }
    }

    if config.any_route_authenticates() {
        let len = config.security.jwt_secret.len();
        if len < MIN_SECRET_BYTES {
            errors.push(ValidationError::WeakSecret(len));
        }
        if config.security.gateway_token.is_empty() {
            errors.push(ValidationError::MissingGatewayToken);
        }
    }

    if config.any_route_limits_usage() {
        let base = &config.usage_service.base_url;
        let valid = Url::parse(base)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidUsageServiceUrl(base.clone()));
        }
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("usage_service.timeout_secs", config.usage_service.timeout_secs),
    ];
    for (field, secs) in timeouts {
        if secs == 0 {
            errors.push(ValidationError::ZeroTimeout(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
