//! Configuration error types.

use thiserror::Error;

use crate::domain::ConfigDomain;

/// Errors raised while loading, validating, or publishing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {0} configuration found")]
    Missing(ConfigDomain),

    #[error("{domain} configuration source unavailable: {reason}")]
    Unavailable { domain: ConfigDomain, reason: String },

    #[error("failed to parse {domain} configuration: {reason}")]
    Parse { domain: ConfigDomain, reason: String },

    #[error("invalid {domain} configuration: {reason}")]
    Invalid { domain: ConfigDomain, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
