//! Configuration loading from disk and environment.

use std::path::Path;
use std::fs;
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides the signing secret.
pub const ENV_JWT_SECRET: &str = "GATEWAY_JWT_SECRET";
/// Overrides the gateway shared secret.
pub const ENV_GATEWAY_TOKEN: &str = "GATEWAY_SECURITY_TOKEN";
/// Overrides the usage service base URL.
pub const ENV_USAGE_SERVICE_URL: &str = "USAGE_SERVICE_URL";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
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

/// Load, apply environment overrides and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;
    finalize(config)
}

/// Apply environment overrides to an already-built config and validate it.
pub fn finalize(mut config: GatewayConfig) -> Result<GatewayConfig, ConfigError> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overwrite secrets and the usage service URL from the environment.
///
/// Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(secret) = lookup(ENV_JWT_SECRET) {
        config.security.jwt_secret = secret;
    }
    if let Some(token) = lookup(ENV_GATEWAY_TOKEN) {
        config.security.gateway_token = token;
    }
    if let Some(url) = lookup(ENV_USAGE_SERVICE_URL) {
        tracing::debug!(usage_service = %url, "Usage service URL taken from environment");
        config.usage_service.base_url = url;
    }
}
