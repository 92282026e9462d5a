//! Caching resolver backed by a pool of [`BackingStore`] workers.

use crate::backing::BackingStore;
use crate::cache::KeyedCache;
use crate::caching::{CachingResolver, Generate};
use crate::category::{Catalogued, Category, CategorySet};
use crate::clock::{Clock, MonotonicClock};
use crate::code::Authority;
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::finder::{self, FindKey};
use crate::pool::{PooledWorker, WorkerFactory, WorkerPool};
use crate::resolver::{Resolver, SourceId, VisitSet};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// [`Generate`] backend borrowing one pooled worker per operation.
pub struct PooledBackend<T, F: WorkerFactory> {
    authority: Authority,
    categories: CategorySet,
    source: SourceId,
    pool: WorkerPool<F>,
    _objects: PhantomData<fn() -> T>,
}

impl<T, F> PooledBackend<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    pub fn new(authority: Authority, categories: CategorySet, pool: WorkerPool<F>) -> Self {
        Self { authority, categories, source: SourceId::fresh(), pool, _objects: PhantomData }
    }

    pub fn pool(&self) -> &WorkerPool<F> {
        &self.pool
    }

    async fn worker(&self, code: &str) -> Result<PooledWorker<F>, ResolveError> {
        self.pool.borrow().await.map_err(|err| err.into_resolve_error(code, Some(self.authority.title())))
    }

    fn store_error(&self, code: &str) -> impl FnOnce(crate::error::StoreError) -> ResolveError + '_ {
        let code = code.to_owned();
        move |err| err.into_resolve_error(&code, Some(self.authority.title()))
    }
}

#[async_trait]
impl<T, F> Generate<T> for PooledBackend<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    fn authority(&self) -> &Authority {
        &self.authority
    }

    fn categories(&self) -> CategorySet {
        self.categories.clone()
    }

    fn source_id(&self) -> SourceId {
        self.source
    }

    async fn generate(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        let mut worker = self.worker(code).await?;
        let object = worker.generate(code).await.map_err(self.store_error(code))?;
        Ok(Arc::new(object))
    }

    async fn generate_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        let mut worker = self.worker(source).await?;
        let objects = worker.generate_pair(source, target).await.map_err(self.store_error(source))?;
        Ok(Arc::new(objects.into_iter().map(Arc::new).collect()))
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        let mut worker = self.worker(code).await?;
        worker.describe(code).await.map_err(self.store_error(code))
    }

    async fn list_codes(
        &self,
        category: Category,
        _visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        let mut worker = self.worker("*").await?;
        worker.list_codes(category).await.map_err(self.store_error("*"))
    }

    async fn search(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        let label = approximate.category().name();
        let mut worker = self.worker(label).await?;
        finder::scan(&mut *worker, &**approximate).await.map_err(self.store_error(label))
    }

    async fn is_available(&self) -> bool {
        match self.pool.try_borrow().await {
            Ok(Some(mut worker)) => worker.is_available().await,
            // Every worker is out serving callers.
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn dispose(&self) {
        self.pool.dispose();
    }
}

/// Caching resolver over a [`WorkerPool`], with a separate find-cache for reverse lookups.
pub struct PooledCachingResolver<T: Catalogued, F: WorkerFactory> {
    inner: CachingResolver<T, PooledBackend<T, F>>,
    finds: KeyedCache<FindKey<T>, Found<T>>,
}

struct Found<T> {
    code: String,
    object: Arc<T>,
}

impl<T, F> std::fmt::Debug for PooledCachingResolver<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledCachingResolver")
            .field("cache", &self.inner)
            .field("finds", &self.finds)
            .field("pool", self.pool())
            .finish()
    }
}

impl<T, F> PooledCachingResolver<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    /// Start building a resolver for `authority` whose workers come from `factory`.
    pub fn builder(authority: Authority, factory: F) -> PooledCachingResolverBuilder<T, F> {
        PooledCachingResolverBuilder {
            authority,
            factory,
            categories: CategorySet::any(),
            config: ResolverConfig::default(),
            clock: Arc::new(MonotonicClock::default()),
            telemetry: Telemetry::default(),
            start_evictor: false,
            _objects: PhantomData,
        }
    }

    pub fn pool(&self) -> &WorkerPool<F> {
        self.inner.backend().pool()
    }

    /// Main cache of resolved objects.
    pub fn cache(&self) -> &KeyedCache<crate::cache::CacheKey, T> {
        self.inner.cache()
    }

    /// Number of live entries in the find-cache.
    pub fn find_cache_len(&self) -> usize {
        self.finds.len()
    }

    async fn locate(&self, approximate: &Arc<T>) -> Result<Option<Arc<Found<T>>>, ResolveError> {
        self.inner.ensure_live()?;
        if let Some((code, object)) = self.inner.locate_by_identifier(approximate).await? {
            return Ok(Some(Arc::new(Found { code, object })));
        }
        let key = FindKey(Arc::clone(approximate));
        if let Some(hit) = self.finds.get(&key) {
            return Ok(Some(hit));
        }
        let slot = self.finds.lock(&key).await;
        if let Some(hit) = slot.peek() {
            return Ok(Some(hit));
        }
        let Some(code) = self.inner.backend().search(approximate).await? else {
            tracing::debug!(target: "codebroker::cache", category = %approximate.category(), "no match found");
            return Ok(None);
        };
        let object = self.inner.resolve(&code).await?;
        let found = Arc::new(Found { code, object });
        if !self.inner.is_disposed() {
            slot.put(Arc::clone(&found));
            // `dispose` may have cleared the find-cache between the check and the put.
            if self.inner.is_disposed() {
                self.finds.remove(&key);
            }
        }
        Ok(Some(found))
    }
}

#[async_trait]
impl<T, F> Resolver<T> for PooledCachingResolver<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    fn authority(&self) -> &Authority {
        self.inner.authority()
    }

    fn categories(&self) -> CategorySet {
        self.inner.categories()
    }

    fn source_id(&self) -> SourceId {
        self.inner.source_id()
    }

    async fn resolve(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        self.inner.resolve(code).await
    }

    async fn resolve_as(&self, code: &str, category: Category) -> Result<Arc<T>, ResolveError> {
        self.inner.resolve_as(code, category).await
    }

    async fn resolve_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        self.inner.resolve_pair(source, target).await
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        self.inner.describe(code).await
    }

    async fn list_codes_guarded(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        self.inner.list_codes_guarded(category, visiting).await
    }

    async fn find(&self, approximate: &Arc<T>) -> Result<Option<Arc<T>>, ResolveError> {
        Ok(self.locate(approximate).await?.map(|found| Arc::clone(&found.object)))
    }

    async fn find_identifier(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        let authority = self.inner.authority();
        Ok(self.locate(approximate).await?.map(|found| authority.scoped(&found.code)))
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn dispose(&self) {
        self.inner.dispose();
        self.finds.clear();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

/// Builder for [`PooledCachingResolver`].
pub struct PooledCachingResolverBuilder<T, F> {
    authority: Authority,
    factory: F,
    categories: CategorySet,
    config: ResolverConfig,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
    start_evictor: bool,
    _objects: PhantomData<fn() -> T>,
}

impl<T, F> PooledCachingResolverBuilder<T, F>
where
    T: Catalogued,
    F: WorkerFactory,
    F::Worker: BackingStore<T>,
{
    /// Categories the resolver claims. Defaults to every category.
    pub fn categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used to age idle workers.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run the pool's background evictor. Requires a tokio runtime at [`build`](Self::build).
    pub fn start_evictor(mut self, start: bool) -> Self {
        self.start_evictor = start;
        self
    }

    pub fn build(self) -> PooledCachingResolver<T, F> {
        let pool = WorkerPool::with_clock(self.factory, self.config.pool().clone(), SharedClock(self.clock))
            .with_telemetry(self.telemetry.clone());
        if self.start_evictor {
            pool.start_evictor();
        }
        let backend = PooledBackend::new(self.authority, self.categories, pool);
        PooledCachingResolver {
            inner: CachingResolver::with_config(backend, &self.config).with_telemetry(self.telemetry),
            finds: KeyedCache::bounded(self.config.find_max_strong()),
        }
    }
}

#[derive(Debug)]
struct SharedClock(Arc<dyn Clock>);

impl Clock for SharedClock {
    fn now_millis(&self) -> u64 {
        self.0.now_millis()
    }
}
