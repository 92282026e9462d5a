#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # codebroker
//!
//! Concurrent caching and coordination layer for authority-scoped code resolution.
//!
//! A *code* such as `"EPSG:4326"` names an expensive-to-build object owned by an *authority*.
//! This crate does not build those objects; it coordinates the backends that do:
//!
//! - **Memoization** with per-key single-flight: concurrent callers of one code share one
//!   generation ([`CachingResolver`]).
//! - **Bounded retention**: the most recent objects stay strongly held, older ones stay reachable
//!   only while someone else holds them ([`cache::BoundedStore`]).
//! - **Worker pools** for backends that are not safe to share ([`WorkerPool`],
//!   [`PooledCachingResolver`]).
//! - **Fallback** between resolvers of one authority ([`FallbackChain`]).
//! - **Routing** of scoped codes to the owning resolver ([`AuthorityRouter`]).
//! - **Reverse lookup** of the code matching an object built elsewhere ([`Resolver::find`]).
//!
//! Every node implements [`Resolver`] and is shared as `Arc<dyn Resolver<T>>`, so the pieces
//! compose freely: a router over chains of pooled caches is the usual shape.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use codebroker::{
//!     factory_fn, Authority, AuthorityRouter, BackingStore, Catalogued, Category,
//!     PooledCachingResolver, Resolver, StoreError,
//! };
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! const NUMBER: Category = Category::new("number");
//!
//! #[derive(Debug, PartialEq)]
//! struct Number(u32);
//!
//! impl Catalogued for Number {
//!     fn category(&self) -> Category { NUMBER }
//!     fn matches(&self, other: &Self) -> bool { self == other }
//!     fn fingerprint(&self) -> u64 { u64::from(self.0) }
//! }
//!
//! struct Parser;
//!
//! #[async_trait]
//! impl BackingStore<Number> for Parser {
//!     async fn generate(&mut self, code: &str) -> Result<Number, StoreError> {
//!         code.parse().map(Number).map_err(|_| StoreError::NotFound)
//!     }
//!     async fn list_codes(&mut self, _: Category) -> Result<BTreeSet<String>, StoreError> {
//!         Ok(BTreeSet::new())
//!     }
//!     async fn describe(&mut self, code: &str) -> Result<String, StoreError> {
//!         Ok(format!("number {code}"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), codebroker::ResolveError> {
//!     let numbers = PooledCachingResolver::<Number, _>::builder(
//!         Authority::new("NUM"),
//!         factory_fn(|| async { Ok::<_, codebroker::BoxError>(Parser) }),
//!     )
//!     .build();
//!
//!     let router = AuthorityRouter::<Number>::new(Authority::new("ALL"));
//!     router.register(Arc::new(numbers))?;
//!
//!     assert_eq!(*router.resolve("NUM:42").await?, Number(42));
//!     Ok(())
//! }
//! ```

pub mod backing;
pub mod cache;
pub mod caching;
pub mod category;
pub mod clock;
pub mod code;
pub mod config;
pub mod error;
pub mod fallback;
pub mod finder;
pub mod pool;
pub mod pooled;
pub mod prelude;
pub mod resolver;
pub mod router;
pub mod service;
pub mod telemetry;

// Re-exports
pub use backing::BackingStore;
pub use cache::{CacheKey, KeyedCache};
pub use caching::{CachingResolver, Generate};
pub use category::{Catalogued, Category, CategorySet};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use code::Authority;
pub use config::ResolverConfig;
pub use error::{BoxError, ConfigError, PoolError, ResolveError, StoreError};
pub use fallback::{Coverage, FallbackChain};
pub use pool::{
    factory_fn, PoolConfig, PoolConfigBuilder, PoolStats, PooledWorker, WorkerFactory, WorkerPool,
};
pub use pooled::{PooledCachingResolver, PooledCachingResolverBuilder};
pub use resolver::{Resolver, SourceId, VisitSet};
pub use router::AuthorityRouter;
pub use service::{CacheLayer, ResolverService};
pub use telemetry::{ResolverEvent, Telemetry};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before doing anything that can
/// panic, so a poisoned lock carries no broken invariant.
pub(crate) fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
