//! Tower adapters.
//!
//! [`ResolverService`] exposes any resolver as a `tower::Service<String>`, so resolution composes
//! with tower middleware (timeouts, concurrency limits, buffering). [`CacheLayer`] goes the other
//! way and wraps a resolver in a transparent [`CachingResolver`].
//!
//! ```rust
//! use codebroker::{CacheLayer, ResolverConfig};
//! use tower_layer::Layer;
//!
//! let layer = CacheLayer::new(ResolverConfig::default().unbounded());
//! # let _ = layer;
//! ```

use crate::caching::CachingResolver;
use crate::category::Catalogued;
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::resolver::Resolver;
use crate::telemetry::Telemetry;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;

/// `tower::Service` resolving one code per request.
pub struct ResolverService<T: Catalogued> {
    resolver: Arc<dyn Resolver<T>>,
}

impl<T: Catalogued> ResolverService<T> {
    pub fn new(resolver: Arc<dyn Resolver<T>>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver<T>> {
        &self.resolver
    }
}

impl<T: Catalogued> Clone for ResolverService<T> {
    fn clone(&self) -> Self {
        Self { resolver: Arc::clone(&self.resolver) }
    }
}

impl<T: Catalogued> std::fmt::Debug for ResolverService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverService")
            .field("authority", &self.resolver.authority().title())
            .finish()
    }
}

impl<T: Catalogued> tower_service::Service<String> for ResolverService<T> {
    type Response = Arc<T>;
    type Error = ResolveError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.resolver.is_disposed() {
            Poll::Ready(Err(ResolveError::disposed(Some(self.resolver.authority().title()))))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, code: String) -> Self::Future {
        let resolver = Arc::clone(&self.resolver);
        Box::pin(async move { resolver.resolve(&code).await })
    }
}

/// Layer wrapping a resolver in a [`CachingResolver`] sharing its source id.
#[derive(Clone, Debug, Default)]
pub struct CacheLayer {
    config: ResolverConfig,
    telemetry: Telemetry,
}

impl CacheLayer {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config, telemetry: Telemetry::default() }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }
}

impl<T: Catalogued> Layer<Arc<dyn Resolver<T>>> for CacheLayer {
    type Service = CachingResolver<T, Arc<dyn Resolver<T>>>;

    fn layer(&self, inner: Arc<dyn Resolver<T>>) -> Self::Service {
        CachingResolver::with_config(inner, &self.config).with_telemetry(self.telemetry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Category, CategorySet};
    use crate::code::Authority;
    use crate::resolver::{SourceId, VisitSet};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tower::{Service, ServiceExt};

    const WORD: Category = Category::new("word");

    #[derive(Debug, PartialEq)]
    struct Word(String);

    impl Catalogued for Word {
        fn category(&self) -> Category {
            WORD
        }
        fn matches(&self, other: &Self) -> bool {
            self == other
        }
        fn fingerprint(&self) -> u64 {
            self.0.len() as u64
        }
    }

    struct Upper {
        authority: Authority,
        source: SourceId,
        calls: AtomicUsize,
        disposed: AtomicBool,
    }

    impl Upper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                authority: Authority::new("UP"),
                source: SourceId::fresh(),
                calls: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Resolver<Word> for Upper {
        fn authority(&self) -> &Authority {
            &self.authority
        }
        fn categories(&self) -> CategorySet {
            CategorySet::of([WORD])
        }
        fn source_id(&self) -> SourceId {
            self.source
        }
        async fn resolve(&self, code: &str) -> Result<Arc<Word>, ResolveError> {
            if self.is_disposed() {
                return Err(ResolveError::disposed(Some("UP")));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Word(self.authority.trim_code(code).to_uppercase())))
        }
        async fn resolve_pair(
            &self,
            source: &str,
            target: &str,
        ) -> Result<Arc<Vec<Arc<Word>>>, ResolveError> {
            Ok(Arc::new(vec![self.resolve(source).await?, self.resolve(target).await?]))
        }
        async fn describe(&self, code: &str) -> Result<String, ResolveError> {
            Ok(code.to_uppercase())
        }
        async fn list_codes_guarded(
            &self,
            _category: Category,
            _visiting: &mut VisitSet,
        ) -> Result<BTreeSet<String>, ResolveError> {
            Ok(BTreeSet::new())
        }
        async fn find(&self, _approximate: &Arc<Word>) -> Result<Option<Arc<Word>>, ResolveError> {
            Ok(None)
        }
        async fn find_identifier(
            &self,
            _approximate: &Arc<Word>,
        ) -> Result<Option<String>, ResolveError> {
            Ok(None)
        }
        async fn is_available(&self) -> bool {
            true
        }
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn service_resolves_codes() {
        let service = ResolverService::new(Upper::new());
        let word = service.oneshot("UP:abc".to_owned()).await.unwrap();
        assert_eq!(*word, Word("ABC".into()));
    }

    #[tokio::test]
    async fn disposed_resolver_is_never_ready() {
        let upper = Upper::new();
        let service = ResolverService::new(upper.clone());
        upper.dispose();
        let err = service.oneshot("abc".to_owned()).await.unwrap_err();
        assert!(err.is_disposed());
    }

    #[tokio::test]
    async fn cache_layer_memoizes_the_inner_resolver() {
        let upper = Upper::new();
        let cached = CacheLayer::default().layer(upper.clone() as Arc<dyn Resolver<Word>>);
        let first = cached.resolve("abc").await.unwrap();
        let second = cached.resolve("UP:abc").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(upper.calls.load(Ordering::SeqCst), 1);
        assert!(cached.same_codes(&*upper));
    }

    #[tokio::test]
    async fn layered_resolver_serves_through_tower() {
        let cached: Arc<dyn Resolver<Word>> =
            Arc::new(CacheLayer::default().layer(Upper::new() as Arc<dyn Resolver<Word>>));
        let mut service = ResolverService::new(cached);
        let word = service.ready().await.unwrap().call("xyz".to_owned()).await.unwrap();
        assert_eq!(word.0, "XYZ");
    }
}
