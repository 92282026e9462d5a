//! Convenient re-exports for building resolver graphs.
pub use crate::{
    backing::BackingStore,
    cache::{BoundedStore, CacheKey, CacheStore, KeyedCache, Retention},
    caching::{CachingResolver, Generate},
    category::{Catalogued, Category, CategorySet},
    code::Authority,
    config::ResolverConfig,
    error::{BoxError, ResolveError, StoreError},
    fallback::{Coverage, FallbackChain},
    pool::{factory_fn, PoolConfig, WorkerFactory, WorkerPool},
    pooled::PooledCachingResolver,
    resolver::Resolver,
    router::AuthorityRouter,
    service::{CacheLayer, ResolverService},
    telemetry::{LogSink, MemorySink, Telemetry},
};
