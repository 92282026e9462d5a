//! Cache-miss-then-generate resolver.
//!
//! For every code (or pair of codes):
//! 1. fail fast once disposed;
//! 2. strip the owning authority's scope and build a [`CacheKey`];
//! 3. return a cached value without taking any lock;
//! 4. otherwise await the key's write lock, look again, and only then ask the backend.
//!
//! At most one generation per key runs at a time, and a failed generation caches nothing so the
//! next waiter retries.

use crate::cache::{CacheKey, KeyedCache};
use crate::category::{Catalogued, Category, CategorySet};
use crate::code::Authority;
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::finder::owned_identifier;
use crate::resolver::{Resolver, SourceId, VisitSet};
use crate::telemetry::{CacheEvent, LifecycleEvent, ResolverEvent, Telemetry};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Producer of the values a [`CachingResolver`] caches.
///
/// Codes handed to a backend are already trimmed of the owning authority's scope.
#[async_trait]
pub trait Generate<T: Catalogued>: Send + Sync + 'static {
    fn authority(&self) -> &Authority;

    fn categories(&self) -> CategorySet;

    fn source_id(&self) -> SourceId;

    async fn generate(&self, code: &str) -> Result<Arc<T>, ResolveError>;

    async fn generate_pair(&self, source: &str, target: &str)
        -> Result<Arc<Vec<Arc<T>>>, ResolveError>;

    async fn describe(&self, code: &str) -> Result<String, ResolveError>;

    async fn list_codes(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError>;

    /// Code whose object matches `approximate`, if any.
    async fn search(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError>;

    async fn is_available(&self) -> bool;

    /// Release the backend's resources.
    fn dispose(&self) {}
}

/// Another resolver as a backend: the [`CachingResolver`] becomes a transparent cache in front of
/// it and reports the same [`SourceId`].
#[async_trait]
impl<T: Catalogued> Generate<T> for Arc<dyn Resolver<T>> {
    fn authority(&self) -> &Authority {
        (**self).authority()
    }

    fn categories(&self) -> CategorySet {
        (**self).categories()
    }

    fn source_id(&self) -> SourceId {
        (**self).source_id()
    }

    async fn generate(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        (**self).resolve(code).await
    }

    async fn generate_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        (**self).resolve_pair(source, target).await
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        (**self).describe(code).await
    }

    async fn list_codes(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        (**self).list_codes_guarded(category, visiting).await
    }

    async fn search(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        (**self).find_identifier(approximate).await
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }

    fn dispose(&self) {
        (**self).dispose();
    }
}

/// A [`KeyedCache`] in front of a [`Generate`] backend.
pub struct CachingResolver<T: Catalogued, G> {
    backend: G,
    objects: KeyedCache<CacheKey, T>,
    pairs: KeyedCache<CacheKey, Vec<Arc<T>>>,
    disposed: AtomicBool,
    telemetry: Telemetry,
}

impl<T: Catalogued, G: Generate<T>> std::fmt::Debug for CachingResolver<T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingResolver")
            .field("authority", &self.backend.authority().title())
            .field("objects", &self.objects)
            .field("pairs", &self.pairs)
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Catalogued, G: Generate<T>> CachingResolver<T, G> {
    /// Resolver with the default [`ResolverConfig`].
    pub fn new(backend: G) -> Self {
        Self::with_config(backend, &ResolverConfig::default())
    }

    pub fn with_config(backend: G, config: &ResolverConfig) -> Self {
        Self {
            backend,
            objects: KeyedCache::with_capacity(config.max_strong()),
            pairs: KeyedCache::with_capacity(config.max_strong()),
            disposed: AtomicBool::new(false),
            telemetry: Telemetry::default(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    /// Cache of single-code results.
    pub fn cache(&self) -> &KeyedCache<CacheKey, T> {
        &self.objects
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ResolveError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ResolveError::disposed(Some(self.backend.authority().title())))
        } else {
            Ok(())
        }
    }

    /// Code matching the identifier `approximate` carries, if this resolver owns it.
    pub(crate) async fn locate_by_identifier(
        &self,
        approximate: &Arc<T>,
    ) -> Result<Option<(String, Arc<T>)>, ResolveError> {
        let Some(code) = owned_identifier(self.backend.authority(), &**approximate) else {
            return Ok(None);
        };
        match self.resolve(code).await {
            Ok(found) if found.matches(approximate) => Ok(Some((code.to_owned(), found))),
            Ok(_) => Ok(None),
            Err(err) if err.is_unrecognized() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn locate(&self, approximate: &Arc<T>) -> Result<Option<(String, Arc<T>)>, ResolveError> {
        self.ensure_live()?;
        if let Some(found) = self.locate_by_identifier(approximate).await? {
            return Ok(Some(found));
        }
        let Some(code) = self.backend.search(approximate).await? else {
            return Ok(None);
        };
        let found = self.resolve(&code).await?;
        Ok(Some((code, found)))
    }

    async fn memoize<V, Fut>(
        &self,
        cache: &KeyedCache<CacheKey, V>,
        key: CacheKey,
        generate: impl FnOnce() -> Fut + Send,
    ) -> Result<Arc<V>, ResolveError>
    where
        V: Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<V>, ResolveError>> + Send,
    {
        self.ensure_live()?;
        if let Some(hit) = cache.get(&key) {
            if self.telemetry.is_enabled() {
                self.telemetry.emit(ResolverEvent::Cache(CacheEvent::Hit { key: key.to_string() }));
            }
            return Ok(hit);
        }
        let slot = cache.lock(&key).await;
        if let Some(hit) = slot.peek() {
            return Ok(hit);
        }
        self.ensure_live()?;

        let started = Instant::now();
        match generate().await {
            Ok(value) => {
                if !self.disposed.load(Ordering::Acquire) {
                    slot.put(Arc::clone(&value));
                    // `dispose` may have cleared the store between the check and the put.
                    if self.disposed.load(Ordering::Acquire) {
                        cache.remove(&key);
                    }
                }
                let elapsed = started.elapsed();
                tracing::debug!(target: "codebroker::cache", key = %key, ?elapsed, "generated");
                self.telemetry.emit(ResolverEvent::Cache(CacheEvent::Generated {
                    key: key.to_string(),
                    elapsed,
                }));
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(target: "codebroker::cache", key = %key, error = %err, "generation failed");
                self.telemetry.emit(ResolverEvent::Cache(CacheEvent::Failed { key: key.to_string() }));
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<T: Catalogued, G: Generate<T>> Resolver<T> for CachingResolver<T, G> {
    fn authority(&self) -> &Authority {
        self.backend.authority()
    }

    fn categories(&self) -> CategorySet {
        self.backend.categories()
    }

    fn source_id(&self) -> SourceId {
        self.backend.source_id()
    }

    async fn resolve(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        let key = CacheKey::code(self.backend.authority(), code);
        let local = self.backend.authority().trim_code(code);
        self.memoize(&self.objects, key, || self.backend.generate(local)).await
    }

    async fn resolve_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        let authority = self.backend.authority();
        let key = CacheKey::pair(authority, source, target);
        let (source, target) = (authority.trim_code(source), authority.trim_code(target));
        self.memoize(&self.pairs, key, || self.backend.generate_pair(source, target)).await
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        self.ensure_live()?;
        self.backend.describe(self.backend.authority().trim_code(code)).await
    }

    async fn list_codes_guarded(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        self.ensure_live()?;
        if !self.categories().contains(category) {
            return Ok(BTreeSet::new());
        }
        self.backend.list_codes(category, visiting).await
    }

    async fn find(&self, approximate: &Arc<T>) -> Result<Option<Arc<T>>, ResolveError> {
        Ok(self.locate(approximate).await?.map(|(_, found)| found))
    }

    async fn find_identifier(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        let authority = self.backend.authority();
        Ok(self.locate(approximate).await?.map(|(code, _)| authority.scoped(&code)))
    }

    async fn is_available(&self) -> bool {
        !self.is_disposed() && self.backend.is_available().await
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.objects.clear();
        self.pairs.clear();
        self.backend.dispose();
        let authority = self.backend.authority().title().to_owned();
        tracing::info!(target: "codebroker::cache", authority = %authority, "resolver disposed");
        self.telemetry.emit(ResolverEvent::Lifecycle(LifecycleEvent::Disposed { authority }));
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
