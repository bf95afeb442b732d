//! Configuration validation and linting.
//!
//! Field ranges are checked through `validator`; cross-field problems that
//! still yield a working pool are reported as warnings.

use std::fmt;
use validator::Validate;

use crate::Config;

/// A non-fatal configuration finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every check against `config`.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(errors) = config.guard.validate() {
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors.iter() {
                result.add_error(format!("guard.{field}: {}", describe(error)));
            }
        }
    }

    if config.maintenance.sweep_interval.is_zero() {
        result.add_error("maintenance.sweep_interval must be greater than zero");
    }

    lint_config(config, &mut result);
    result
}

fn describe(error: &validator::ValidationError) -> String {
    match &error.message {
        Some(message) => message.to_string(),
        None => format!("failed {} check", error.code),
    }
}

/// Checks for settings that work but probably do not do what was meant.
fn lint_config(config: &Config, result: &mut ValidationResult) {
    let pool = &config.pool;

    if pool.max_cached > 0 && pool.max_concurrent > 0 && pool.max_concurrent < pool.max_cached {
        result.add_warning(ValidationWarning::new(format!(
            "pool.max_concurrent ({}) is below pool.max_cached ({}) and will be raised to match",
            pool.max_concurrent, pool.max_cached
        )));
    }

    let effective = pool.normalized();
    if config.maintenance.sweep_interval > effective.idle_timeout {
        result.add_warning(ValidationWarning::new(format!(
            "maintenance.sweep_interval ({:?}) exceeds pool.idle_timeout ({:?}); idle sessions will outlive their timeout",
            config.maintenance.sweep_interval, effective.idle_timeout
        )));
    }

    if config.guard.max_total > 0 && config.guard.max_total < effective.max_concurrent {
        result.add_warning(ValidationWarning::new(format!(
            "guard.max_total ({}) is below the per-host pool.max_concurrent ({}); the global ceiling binds first",
            config.guard.max_total, effective.max_concurrent
        )));
    }
}
