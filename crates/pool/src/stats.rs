//! Pool statistics snapshots.

use hostpool_common::HostKey;

/// Occupancy of one host group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub host: HostKey,
    /// Sessions checked out to callers
    pub active: usize,
    /// Sessions cached for reuse
    pub idle: usize,
    pub max_cached: usize,
    pub max_concurrent: usize,
}

impl HostStats {
    /// Sessions counted against `max_concurrent`.
    pub fn total(&self) -> usize {
        self.active + self.idle
    }

    pub fn is_saturated(&self) -> bool {
        self.total() >= self.max_concurrent
    }
}

/// Aggregate view of a whole pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of host groups
    pub hosts: usize,
    pub active: usize,
    pub idle: usize,
    /// Sessions opened through the factory
    pub total_created: u64,
    /// Acquisitions served from the idle cache
    pub total_reused: u64,
    /// Released sessions that were closed instead of cached
    pub total_discarded: u64,
    /// Idle sessions closed by sweeps
    pub total_evicted: u64,
    pub disposed: bool,
}

impl PoolStats {
    /// Fraction of acquisitions served from the idle cache.
    pub fn reuse_rate(&self) -> f64 {
        let total = self.total_created + self.total_reused;
        if total == 0 {
            0.0
        } else {
            self.total_reused as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_rate() {
        let stats = PoolStats {
            total_created: 1,
            total_reused: 3,
            ..Default::default()
        };
        assert!((stats.reuse_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().reuse_rate(), 0.0);
    }

    #[test]
    fn test_host_saturation() {
        let stats = HostStats {
            host: HostKey::new("h"),
            active: 3,
            idle: 2,
            max_cached: 2,
            max_concurrent: 5,
        };
        assert_eq!(stats.total(), 5);
        assert!(stats.is_saturated());
    }
}
