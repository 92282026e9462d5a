//! Validated worker pool configuration.

use crate::error::ConfigError;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Tuning of a [`WorkerPool`](super::WorkerPool).
///
/// Construct with [`PoolConfig::builder`]; every constructed value has passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "PoolConfigBuilder", into = "PoolConfigBuilder"))]
pub struct PoolConfig {
    min_idle: usize,
    max_idle: usize,
    max_active: usize,
    idle_eviction_age: Option<Duration>,
    soft_idle_eviction_age: Option<Duration>,
    eviction_scan_interval: Duration,
}

impl PoolConfig {
    /// Builder starting from the defaults.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Idle workers kept around even when old enough for soft eviction.
    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    /// Returned workers beyond this many idle ones are destroyed.
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    /// Maximum number of workers borrowed at once.
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Idle age after which a worker is always destroyed.
    pub fn idle_eviction_age(&self) -> Option<Duration> {
        self.idle_eviction_age
    }

    /// Idle age after which a worker is destroyed if more than `min_idle` remain.
    pub fn soft_idle_eviction_age(&self) -> Option<Duration> {
        self.soft_idle_eviction_age
    }

    /// Period of the background evictor.
    pub fn eviction_scan_interval(&self) -> Duration {
        self.eviction_scan_interval
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let defaults = PoolConfigBuilder::default();
        Self {
            min_idle: defaults.min_idle,
            max_idle: defaults.max_idle,
            max_active: defaults.max_active,
            idle_eviction_age: defaults.idle_eviction_age,
            soft_idle_eviction_age: defaults.soft_idle_eviction_age,
            eviction_scan_interval: defaults.eviction_scan_interval,
        }
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfigBuilder {
    min_idle: usize,
    max_idle: usize,
    max_active: usize,
    idle_eviction_age: Option<Duration>,
    soft_idle_eviction_age: Option<Duration>,
    eviction_scan_interval: Duration,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_idle: 2,
            max_active: 2,
            idle_eviction_age: Some(Duration::from_secs(120)),
            soft_idle_eviction_age: Some(Duration::from_secs(10)),
            eviction_scan_interval: Duration::from_secs(5),
        }
    }
}

impl PoolConfigBuilder {
    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Must be > 0 and at most `Semaphore::MAX_PERMITS`.
    pub fn max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// `None` disables hard idle eviction.
    pub fn idle_eviction_age(mut self, age: Option<Duration>) -> Self {
        self.idle_eviction_age = age;
        self
    }

    /// `None` disables soft idle eviction.
    pub fn soft_idle_eviction_age(mut self, age: Option<Duration>) -> Self {
        self.soft_idle_eviction_age = age;
        self
    }

    /// Must be non-zero.
    pub fn eviction_scan_interval(mut self, interval: Duration) -> Self {
        self.eviction_scan_interval = interval;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        if self.max_active == 0 || self.max_active > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidMaxActive { provided: self.max_active });
        }
        if self.min_idle > self.max_idle {
            return Err(ConfigError::MinIdleExceedsMaxIdle {
                min_idle: self.min_idle,
                max_idle: self.max_idle,
            });
        }
        if self.eviction_scan_interval.is_zero() {
            return Err(ConfigError::InvalidScanInterval);
        }
        if let (Some(soft), Some(hard)) = (self.soft_idle_eviction_age, self.idle_eviction_age) {
            if soft > hard {
                return Err(ConfigError::SoftAgeExceedsHardAge);
            }
        }
        Ok(PoolConfig {
            min_idle: self.min_idle,
            max_idle: self.max_idle,
            max_active: self.max_active,
            idle_eviction_age: self.idle_eviction_age,
            soft_idle_eviction_age: self.soft_idle_eviction_age,
            eviction_scan_interval: self.eviction_scan_interval,
        })
    }
}

impl TryFrom<PoolConfigBuilder> for PoolConfig {
    type Error = ConfigError;

    fn try_from(builder: PoolConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl From<PoolConfig> for PoolConfigBuilder {
    fn from(config: PoolConfig) -> Self {
        Self {
            min_idle: config.min_idle,
            max_idle: config.max_idle,
            max_active: config.max_active,
            idle_eviction_age: config.idle_eviction_age,
            soft_idle_eviction_age: config.soft_idle_eviction_age,
            eviction_scan_interval: config.eviction_scan_interval,
        }
    }
}
