//! Configuration types for pools, the global guard and maintenance.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Default number of idle sessions cached per host.
pub const DEFAULT_MAX_CACHED: usize = 5;
/// Default number of live (active + idle) sessions per host.
pub const DEFAULT_MAX_CONCURRENT: usize = 20;
/// Default process-wide ceiling on open sessions.
pub const DEFAULT_MAX_TOTAL: usize = 100;
/// Default time an idle session may stay cached.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Default interval at which blocked waiters re-check their exit condition.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Pool Configuration
// ============================================================================

/// Per-pool limits. Every limit applies to each host separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum idle sessions kept per host (0 = default)
    #[serde(default = "default_max_cached")]
    pub max_cached: usize,

    /// Maximum active + idle sessions per host (0 = default).
    /// Raised to `max_cached` when smaller.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long a session may stay idle before a sweep closes it
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// Upper bound on how long a blocked acquire sleeps between checks
    #[serde(default = "default_poll_interval")]
    pub wait_poll_interval: Duration,
}

fn default_max_cached() -> usize {
    DEFAULT_MAX_CACHED
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_cached: DEFAULT_MAX_CACHED,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            wait_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given per-host limits.
    pub fn with_limits(max_cached: usize, max_concurrent: usize) -> Self {
        Self {
            max_cached,
            max_concurrent,
            ..Default::default()
        }
    }

    /// Resolve "use the default" markers and enforce `max_concurrent >= max_cached`.
    pub fn normalized(&self) -> Self {
        let max_cached = if self.max_cached > 0 {
            self.max_cached
        } else {
            DEFAULT_MAX_CACHED
        };
        let max_concurrent = if self.max_concurrent > 0 {
            self.max_concurrent
        } else {
            DEFAULT_MAX_CONCURRENT
        };

        Self {
            max_cached,
            max_concurrent: max_concurrent.max(max_cached),
            idle_timeout: non_zero_or(self.idle_timeout, DEFAULT_IDLE_TIMEOUT),
            wait_poll_interval: non_zero_or(self.wait_poll_interval, DEFAULT_POLL_INTERVAL),
        }
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

// ============================================================================
// Global Guard Configuration
// ============================================================================

/// Settings for the process-wide connection guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GuardConfig {
    /// Ceiling on open sessions across every pool and host
    #[serde(default = "default_max_total")]
    #[validate(range(min = 1))]
    pub max_total: usize,

    /// How often threads waiting for global capacity re-check cancellation
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_max_total() -> usize {
    DEFAULT_MAX_TOTAL
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ============================================================================
// Maintenance Configuration
// ============================================================================

/// Settings for the background idle sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Time between two idle sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_cached, 5);
        assert_eq!(config.max_concurrent, 20);
        assert_eq!(config.idle_timeout, Duration::from_millis(60_000));
        assert_eq!(config.wait_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_normalized_replaces_zero_limits() {
        let config = PoolConfig::with_limits(0, 0).normalized();
        assert_eq!(config.max_cached, DEFAULT_MAX_CACHED);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn test_normalized_raises_concurrency_to_cache_size() {
        let config = PoolConfig::with_limits(8, 3).normalized();
        assert_eq!(config.max_cached, 8);
        assert_eq!(config.max_concurrent, 8);
    }

    #[test]
    fn test_normalized_replaces_zero_durations() {
        let config = PoolConfig {
            idle_timeout: Duration::ZERO,
            wait_poll_interval: Duration::ZERO,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(config.wait_poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_cached": 2}"#).unwrap();
        assert_eq!(config.max_cached, 2);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);

        let guard: GuardConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(guard, GuardConfig::default());
    }

    #[test]
    fn test_guard_config_range_validation() {
        let guard = GuardConfig {
            max_total: 0,
            ..Default::default()
        };
        assert!(guard.validate().is_err());
        assert!(GuardConfig::default().validate().is_ok());
    }

    proptest::proptest! {
        #[test]
        fn prop_normalized_limits_are_consistent(cached in 0usize..64, concurrent in 0usize..64) {
            let config = PoolConfig::with_limits(cached, concurrent).normalized();
            proptest::prop_assert!(config.max_cached > 0);
            proptest::prop_assert!(config.max_concurrent >= config.max_cached);
            if cached > 0 {
                proptest::prop_assert_eq!(config.max_cached, cached);
            }
        }
    }
}
