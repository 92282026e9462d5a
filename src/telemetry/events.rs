use std::fmt;
use std::time::Duration;

/// Events emitted by resolvers, pools and routers.
///
/// Events describe what happened to a code on its way through the resolver graph. They are
/// delivered best-effort to the [`Telemetry`](super::Telemetry) sink configured on each node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverEvent {
    /// Cache events
    Cache(CacheEvent),
    /// Worker pool events
    Pool(PoolEvent),
    /// Fallback chain events
    Fallback(FallbackEvent),
    /// Router events
    Router(RouterEvent),
    /// Teardown of a resolver node
    Lifecycle(LifecycleEvent),
}

/// Events emitted by caching resolvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The value was already cached.
    Hit {
        /// Cache key, e.g. `EPSG:4326`
        key: String,
    },
    /// The value was generated and stored.
    Generated {
        /// Cache key
        key: String,
        /// Time spent in the backend
        elapsed: Duration,
    },
    /// Generation failed; nothing was cached.
    Failed {
        /// Cache key
        key: String,
    },
}

/// Why a worker was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Failed validation before reuse.
    Invalid,
    /// The borrower invalidated it.
    Invalidated,
    /// Activation or passivation failed.
    LifecycleFailure,
    /// `max_idle` idle workers already existed.
    ExcessIdle,
    /// Idle for too long.
    Evicted,
    /// The pool was disposed.
    Disposed,
}

/// Events emitted by worker pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A new worker was created.
    Created {
        /// Workers borrowed right now
        active: usize,
        /// Workers idle right now
        idle: usize,
    },
    /// A worker was destroyed.
    Destroyed {
        /// Cause
        reason: DestroyReason,
    },
    /// A borrower found every worker busy and had to wait.
    Exhausted {
        /// Configured limit
        max_active: usize,
    },
}

/// Events emitted by fallback chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackEvent {
    /// The primary failed and the secondary was consulted.
    Activated {
        /// Requested code
        code: String,
        /// Authority of the chain
        authority: String,
        /// Failures recorded by this chain so far, this one included
        failures: u64,
    },
}

/// Events emitted by authority routers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A route was added.
    Registered {
        /// Authority the route answers to
        authority: String,
    },
    /// No registered authority owns the code.
    Unrouted {
        /// Requested code
        code: String,
    },
}

/// Lifecycle events shared by every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `dispose()` tore the node down.
    Disposed {
        /// Authority of the node
        authority: String,
    },
}

impl fmt::Display for ResolverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverEvent::Cache(event) => write!(f, "Cache::{}", event),
            ResolverEvent::Pool(event) => write!(f, "Pool::{}", event),
            ResolverEvent::Fallback(event) => write!(f, "Fallback::{}", event),
            ResolverEvent::Router(event) => write!(f, "Router::{}", event),
            ResolverEvent::Lifecycle(event) => write!(f, "Lifecycle::{}", event),
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { key } => write!(f, "Hit({})", key),
            CacheEvent::Generated { key, elapsed } => {
                write!(f, "Generated({}, elapsed={:?})", key, elapsed)
            }
            CacheEvent::Failed { key } => write!(f, "Failed({})", key),
        }
    }
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DestroyReason::Invalid => "invalid",
            DestroyReason::Invalidated => "invalidated",
            DestroyReason::LifecycleFailure => "lifecycle_failure",
            DestroyReason::ExcessIdle => "excess_idle",
            DestroyReason::Evicted => "evicted",
            DestroyReason::Disposed => "disposed",
        };
        f.write_str(reason)
    }
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::Created { active, idle } => {
                write!(f, "Created(active={}, idle={})", active, idle)
            }
            PoolEvent::Destroyed { reason } => write!(f, "Destroyed({})", reason),
            PoolEvent::Exhausted { max_active } => write!(f, "Exhausted({}/{})", max_active, max_active),
        }
    }
}

impl fmt::Display for FallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackEvent::Activated { code, authority, failures } => {
                write!(f, "Activated({}:{}, failures={})", authority, code, failures)
            }
        }
    }
}

impl fmt::Display for RouterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterEvent::Registered { authority } => write!(f, "Registered({})", authority),
            RouterEvent::Unrouted { code } => write!(f, "Unrouted({})", code),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Disposed { authority } => write!(f, "Disposed({})", authority),
        }
    }
}
