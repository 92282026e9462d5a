//! Error types for resolvers, pools and backing stores.
use std::fmt;

/// Boxed error used for causes coming from outside the crate (backing stores, worker factories).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for every resolver operation.
///
/// Each variant carries the offending code and, where known, the authority that
/// was expected to own it.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The code is not recognized by this resolver.
    #[error("no object for code '{code}' in {}", AuthorityName(.authority))]
    NotFound {
        /// Code as presented by the caller.
        code: String,
        /// Authority that was consulted.
        authority: Option<String>,
    },
    /// The backing store failed for a reason other than an unknown code.
    #[error("failed to generate '{code}' in {}: {source}", AuthorityName(.authority))]
    GenerationFailed {
        /// Code as presented by the caller.
        code: String,
        /// Authority that was consulted.
        authority: Option<String>,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },
    /// The resolver has been torn down with `dispose()`.
    #[error("resolver for {} has been disposed", AuthorityName(.authority))]
    Disposed {
        /// Authority of the disposed resolver.
        authority: Option<String>,
    },
    /// No registered authority owns the code's scope.
    #[error("no registered authority owns code '{code}' (tried {})", AuthorityName(.authority))]
    NoOwningAuthority {
        /// Code as presented by the caller.
        code: String,
        /// Most global authority candidate that was tried, if the code had a scope at all.
        authority: Option<String>,
    },
}

struct AuthorityName<'a>(&'a Option<String>);

impl fmt::Display for AuthorityName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => write!(f, "authority '{}'", name),
            None => f.write_str("no authority"),
        }
    }
}

impl ResolveError {
    /// Build a `NotFound` error.
    pub fn not_found(code: impl Into<String>, authority: Option<&str>) -> Self {
        Self::NotFound { code: code.into(), authority: authority.map(str::to_owned) }
    }

    /// Build a `GenerationFailed` error wrapping `source`.
    pub fn generation_failed(
        code: impl Into<String>,
        authority: Option<&str>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::GenerationFailed {
            code: code.into(),
            authority: authority.map(str::to_owned),
            source: source.into(),
        }
    }

    /// Build a `Disposed` error.
    pub fn disposed(authority: Option<&str>) -> Self {
        Self::Disposed { authority: authority.map(str::to_owned) }
    }

    /// Build a `NoOwningAuthority` error.
    pub fn no_owning_authority(code: impl Into<String>, authority: Option<&str>) -> Self {
        Self::NoOwningAuthority { code: code.into(), authority: authority.map(str::to_owned) }
    }

    /// Check if this error is a plain `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a `GenerationFailed`.
    pub fn is_generation_failed(&self) -> bool {
        matches!(self, Self::GenerationFailed { .. })
    }

    /// Check if this error is due to disposal.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// Check if this error is a routing failure.
    pub fn is_no_owning_authority(&self) -> bool {
        matches!(self, Self::NoOwningAuthority { .. })
    }

    /// `NotFound` or `NoOwningAuthority`: the resolver simply does not know the code.
    pub fn is_unrecognized(&self) -> bool {
        self.is_not_found() || self.is_no_owning_authority()
    }

    /// Errors after which a fallback resolver is consulted.
    ///
    /// `Disposed` is excluded: a torn-down chain must fail fast.
    pub fn triggers_fallback(&self) -> bool {
        self.is_unrecognized() || self.is_generation_failed()
    }

    /// Offending code, if the variant carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::NotFound { code, .. }
            | Self::GenerationFailed { code, .. }
            | Self::NoOwningAuthority { code, .. } => Some(code),
            Self::Disposed { .. } => None,
        }
    }

    /// Authority attached to the error, if known.
    pub fn authority(&self) -> Option<&str> {
        match self {
            Self::NotFound { authority, .. }
            | Self::GenerationFailed { authority, .. }
            | Self::Disposed { authority }
            | Self::NoOwningAuthority { authority, .. } => authority.as_deref(),
        }
    }
}

/// Errors reported by a backing store worker.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store does not know the code.
    #[error("code not found in backing store")]
    NotFound,
    /// Any other failure (I/O, parse error, lost connection...).
    #[error("backing store failure: {0}")]
    Failed(#[source] BoxError),
}

impl StoreError {
    /// Wrap an arbitrary error as a store failure.
    pub fn failed(source: impl Into<BoxError>) -> Self {
        Self::Failed(source.into())
    }

    /// Convert into a [`ResolveError`] carrying the code and authority context.
    pub fn into_resolve_error(self, code: &str, authority: Option<&str>) -> ResolveError {
        match self {
            Self::NotFound => ResolveError::not_found(code, authority),
            Self::Failed(source) => ResolveError::generation_failed(code, authority, source),
        }
    }
}

/// Errors from [`crate::pool::WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been disposed; no more workers are handed out.
    #[error("worker pool has been disposed")]
    Disposed,
    /// The factory failed to create a worker.
    #[error("failed to create worker: {0}")]
    Create(#[source] BoxError),
    /// The factory failed to activate a worker for borrowing.
    #[error("failed to activate worker: {0}")]
    Activate(#[source] BoxError),
}

impl PoolError {
    /// Check if this error is due to pool disposal.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Convert into a [`ResolveError`]: disposal stays `Disposed`, everything else becomes
    /// `GenerationFailed`.
    pub fn into_resolve_error(self, code: &str, authority: Option<&str>) -> ResolveError {
        match self {
            Self::Disposed => ResolveError::disposed(authority),
            other => ResolveError::generation_failed(code, authority, other),
        }
    }
}

/// Errors produced when validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_active` must be > 0 and fit in a semaphore.
    #[error("max_active must be in 1..={max} (got {provided})", max = tokio::sync::Semaphore::MAX_PERMITS)]
    InvalidMaxActive {
        /// Value provided by caller.
        provided: usize,
    },
    /// `min_idle` cannot exceed `max_idle`.
    #[error("min_idle ({min_idle}) must not exceed max_idle ({max_idle})")]
    MinIdleExceedsMaxIdle {
        /// Configured minimum.
        min_idle: usize,
        /// Configured maximum.
        max_idle: usize,
    },
    /// The eviction scan interval must be non-zero.
    #[error("eviction_scan_interval must be > 0")]
    InvalidScanInterval,
    /// The soft idle age must not be longer than the hard idle age.
    #[error("soft_idle_eviction_age must not exceed idle_eviction_age")]
    SoftAgeExceedsHardAge,
    /// A cache capacity must be > 0.
    #[error("{field} must be > 0")]
    ZeroCapacity {
        /// Name of the offending setting.
        field: &'static str,
    },
}
