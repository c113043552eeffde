use std::time::Duration;

use super::error::{CbcastError, Result};

pub const DEFAULT_QUORUM: usize = 5;
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Settings shared by every member of a [`Group`](crate::causal::Group).
///
/// ```rust
/// use std::time::Duration;
/// use simple_cbcast::GroupConfig;
///
/// let config = GroupConfig::new()
///     .quorum(3)
///     .delay_range(Duration::from_millis(10), Duration::from_millis(50));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// Members required before anyone may send.
    pub quorum: usize,
    /// Period of each node's pending-buffer sweep.
    pub recheck_interval: Duration,
    /// Lower bound of the random per-recipient transmission delay.
    pub min_delay: Duration,
    /// Upper bound of the random per-recipient transmission delay.
    pub max_delay: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupConfig {
    pub fn new() -> Self {
        GroupConfig {
            quorum: DEFAULT_QUORUM,
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Defaults overlaid with `CBCAST_QUORUM` and `CBCAST_RECHECK_MS` when
    /// they are set and parse. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(quorum) = std::env::var("CBCAST_QUORUM")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.quorum = quorum;
        }
        if let Some(ms) = std::env::var("CBCAST_RECHECK_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.recheck_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    pub fn delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.quorum == 0 {
            return Err(CbcastError::InvalidConfig {
                reason: "quorum must be at least 1".into(),
            });
        }
        // tokio::time::interval panics on a zero period
        if self.recheck_interval.is_zero() {
            return Err(CbcastError::InvalidConfig {
                reason: "recheck interval must be non-zero".into(),
            });
        }
        if self.min_delay > self.max_delay {
            return Err(CbcastError::InvalidConfig {
                reason: format!(
                    "min delay {:?} exceeds max delay {:?}",
                    self.min_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GroupConfig::default();
        assert_eq!(config.quorum, 5);
        assert_eq!(config.recheck_interval, Duration::from_secs(1));
        assert_eq!(config.min_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_quorum() {
        let config = GroupConfig::new().quorum(0);
        assert!(matches!(config.validate(), Err(CbcastError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = GroupConfig::new().recheck_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(CbcastError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_delay_range() {
        let config = GroupConfig::new().delay_range(Duration::from_secs(2), Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(CbcastError::InvalidConfig { .. })));
    }

    #[test]
    fn test_equal_delay_bounds_are_valid() {
        let config = GroupConfig::new().delay_range(Duration::from_millis(5), Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }
}
