//! Configuration loading and validation for hostpool.
//!
//! Configuration is written in KDL and split into three blocks: `pool`
//! (per-host limits and idle timeout), `guard` (the process-wide ceiling)
//! and `maintenance` (the idle sweeper). Every field has a default, so an
//! empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub mod kdl;
pub mod types;
pub mod validate;

pub use types::{
    GuardConfig, MaintenanceConfig, PoolConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CACHED,
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_TOTAL, DEFAULT_POLL_INTERVAL, DEFAULT_SWEEP_INTERVAL,
};
pub use validate::{ValidationResult, ValidationWarning};

/// Configuration shipped with the binary.
pub const DEFAULT_CONFIG: &str = r#"
pool {
    max-cached 5
    max-concurrent 20
    idle-timeout-ms 60000
    wait-poll-interval-ms 500
}
guard {
    max-total 100
    poll-interval-ms 500
}
maintenance {
    sweep-interval-ms 10000
}
"#;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid KDL: {0}")]
    Parse(#[from] ::kdl::KdlError),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Parse configuration from KDL source text.
    pub fn from_kdl_str(source: &str) -> Result<Self, ConfigError> {
        self::kdl::parse_document(source)
    }

    /// Load configuration from a KDL file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");

        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_kdl_str(&source)?;

        info!(
            path = %path.display(),
            max_cached = config.pool.max_cached,
            max_concurrent = config.pool.max_concurrent,
            max_total = config.guard.max_total,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// The configuration embedded in [`DEFAULT_CONFIG`].
    pub fn default_embedded() -> Result<Self, ConfigError> {
        Self::from_kdl_str(DEFAULT_CONFIG)
    }

    /// Validate the configuration.
    ///
    /// Hard errors fail the call; soft problems come back as warnings.
    pub fn validate(&self) -> Result<ValidationResult, ConfigError> {
        let result = validate::validate_config(self);
        if result.errors.is_empty() {
            Ok(result)
        } else {
            Err(ConfigError::Validation(result.errors))
        }
    }
}
