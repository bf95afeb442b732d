//! KDL configuration parsing.
//!
//! ```kdl
//! pool {
//!     max-cached 5
//!     max-concurrent 20
//!     idle-timeout-ms 60000
//!     wait-poll-interval-ms 500
//! }
//! guard {
//!     max-total 100
//!     poll-interval-ms 500
//! }
//! maintenance {
//!     sweep-interval-ms 10000
//! }
//! ```

use std::time::Duration;

use ::kdl::{KdlDocument, KdlNode, KdlValue};
use tracing::{trace, warn};

use crate::types::{GuardConfig, MaintenanceConfig, PoolConfig};
use crate::{Config, ConfigError};

/// Parse a complete KDL configuration document.
pub fn parse_document(source: &str) -> Result<Config, ConfigError> {
    let doc: KdlDocument = source.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "pool" => config.pool = parse_pool_config(node)?,
            "guard" => config.guard = parse_guard_config(node)?,
            "maintenance" => config.maintenance = parse_maintenance_config(node)?,
            other => warn!(node = other, "Ignoring unknown top-level configuration node"),
        }
    }

    Ok(config)
}

/// Parse the `pool { ... }` block
fn parse_pool_config(node: &KdlNode) -> Result<PoolConfig, ConfigError> {
    trace!("Parsing pool configuration block");
    let mut config = PoolConfig::default();

    for child in child_nodes(node) {
        let key = child.name().value();
        match key {
            "max-cached" => config.max_cached = get_usize(child, "pool")?,
            "max-concurrent" => config.max_concurrent = get_usize(child, "pool")?,
            "idle-timeout-ms" => config.idle_timeout = get_millis(child, "pool")?,
            "wait-poll-interval-ms" => config.wait_poll_interval = get_millis(child, "pool")?,
            other => warn!(section = "pool", key = other, "Ignoring unknown configuration key"),
        }
    }

    trace!(
        max_cached = config.max_cached,
        max_concurrent = config.max_concurrent,
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        "Parsed pool configuration"
    );
    Ok(config)
}

/// Parse the `guard { ... }` block
fn parse_guard_config(node: &KdlNode) -> Result<GuardConfig, ConfigError> {
    trace!("Parsing guard configuration block");
    let mut config = GuardConfig::default();

    for child in child_nodes(node) {
        match child.name().value() {
            "max-total" => config.max_total = get_usize(child, "guard")?,
            "poll-interval-ms" => config.poll_interval = get_millis(child, "guard")?,
            other => warn!(section = "guard", key = other, "Ignoring unknown configuration key"),
        }
    }

    trace!(max_total = config.max_total, "Parsed guard configuration");
    Ok(config)
}

/// Parse the `maintenance { ... }` block
fn parse_maintenance_config(node: &KdlNode) -> Result<MaintenanceConfig, ConfigError> {
    let mut config = MaintenanceConfig::default();

    for child in child_nodes(node) {
        match child.name().value() {
            "sweep-interval-ms" => config.sweep_interval = get_millis(child, "maintenance")?,
            other => warn!(
                section = "maintenance",
                key = other,
                "Ignoring unknown configuration key"
            ),
        }
    }

    Ok(config)
}

// ============================================================================
// Helpers
// ============================================================================

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|doc| doc.nodes()).unwrap_or(&[])
}

/// First positional argument of a node, e.g. `5` in `max-cached 5`.
fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

fn get_u64(node: &KdlNode, section: &str) -> Result<u64, ConfigError> {
    let key = node.name().value();
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: format!("{section}.{key}"),
        reason: reason.to_string(),
    };

    let value = first_arg(node).ok_or_else(|| invalid("missing value"))?;
    let number = value
        .as_integer()
        .ok_or_else(|| invalid("expected an integer"))?;
    u64::try_from(number).map_err(|_| invalid("must not be negative"))
}

fn get_usize(node: &KdlNode, section: &str) -> Result<usize, ConfigError> {
    let value = get_u64(node, section)?;
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key: format!("{section}.{}", node.name().value()),
        reason: "value too large".to_string(),
    })
}

fn get_millis(node: &KdlNode, section: &str) -> Result<Duration, ConfigError> {
    get_u64(node, section).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let config = parse_document(
            r#"
            pool {
                max-cached 3
                max-concurrent 7
                idle-timeout-ms 30000
                wait-poll-interval-ms 250
            }
            guard {
                max-total 40
                poll-interval-ms 100
            }
            maintenance {
                sweep-interval-ms 5000
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_cached, 3);
        assert_eq!(config.pool.max_concurrent, 7);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.pool.wait_poll_interval, Duration::from_millis(250));
        assert_eq!(config.guard.max_total, 40);
        assert_eq!(config.guard.poll_interval, Duration::from_millis(100));
        assert_eq!(config.maintenance.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_blocks_use_defaults() {
        let config = parse_document("pool { max-cached 2; }").unwrap();
        assert_eq!(config.pool.max_cached, 2);
        assert_eq!(config.pool.max_concurrent, PoolConfig::default().max_concurrent);
        assert_eq!(config.guard, GuardConfig::default());
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = parse_document("pool { colour 3; }\nextras { }").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_negative_value_is_rejected() {
        let err = parse_document("pool { max-cached -1; }").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "pool.max-cached"
        ));
    }

    #[test]
    fn test_string_value_is_rejected() {
        let err = parse_document(r#"guard { max-total "lots"; }"#).unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid value for guard.max-total: expected an integer"
        );
    }

    #[test]
    fn test_missing_value_is_rejected() {
        let err = parse_document("maintenance { sweep-interval-ms; }").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref reason, .. } if reason == "missing value"
        ));
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_document("pool { max-cached 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
