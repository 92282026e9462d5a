//! Resolver tuning.

use crate::error::ConfigError;
use crate::pool::PoolConfig;
use std::num::NonZeroUsize;

const DEFAULT_MAX_STRONG: usize = 100;
const DEFAULT_FIND_MAX_STRONG: usize = 32;

/// Cache and pool settings of a caching resolver.
///
/// `max_strong: None` keeps every cached object alive for the life of the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResolverConfig {
    max_strong: Option<NonZeroUsize>,
    find_max_strong: NonZeroUsize,
    pool: PoolConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_strong: NonZeroUsize::new(DEFAULT_MAX_STRONG),
            find_max_strong: NonZeroUsize::new(DEFAULT_FIND_MAX_STRONG).unwrap_or(NonZeroUsize::MIN),
            pool: PoolConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Objects kept strongly by the main cache, or `None` for no limit.
    pub fn max_strong(&self) -> Option<NonZeroUsize> {
        self.max_strong
    }

    /// Objects kept strongly by the find-cache.
    pub fn find_max_strong(&self) -> NonZeroUsize {
        self.find_max_strong
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Limit the main cache. Zero is rejected.
    pub fn with_max_strong(mut self, max_strong: usize) -> Result<Self, ConfigError> {
        self.max_strong =
            Some(NonZeroUsize::new(max_strong).ok_or(ConfigError::ZeroCapacity { field: "max_strong" })?);
        Ok(self)
    }

    /// Keep every cached object strongly.
    pub fn unbounded(mut self) -> Self {
        self.max_strong = None;
        self
    }

    /// Limit the find-cache. Zero is rejected.
    pub fn with_find_max_strong(mut self, find_max_strong: usize) -> Result<Self, ConfigError> {
        self.find_max_strong = NonZeroUsize::new(find_max_strong)
            .ok_or(ConfigError::ZeroCapacity { field: "find_max_strong" })?;
        Ok(self)
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.max_strong().map(NonZeroUsize::get), Some(100));
        assert_eq!(config.find_max_strong().get(), 32);
        assert_eq!(config.pool(), &PoolConfig::default());
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let err = ResolverConfig::default().with_max_strong(0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity { field: "max_strong" });
        let err = ResolverConfig::default().with_find_max_strong(0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity { field: "find_max_strong" });
    }

    #[test]
    fn unbounded_clears_the_limit() {
        assert_eq!(ResolverConfig::default().unbounded().max_strong(), None);
    }
}
