//! Compile-time prelude coverage test.
use codebroker::prelude::*;
use std::sync::Arc;
use tower_layer::Layer;

#[derive(Debug)]
struct Unit;

impl Catalogued for Unit {
    fn category(&self) -> Category {
        Category::new("unit")
    }
    fn matches(&self, _other: &Self) -> bool {
        true
    }
    fn fingerprint(&self) -> u64 {
        0
    }
}

#[tokio::test]
async fn prelude_reexports_core_types() {
    let router: Arc<dyn Resolver<Unit>> = Arc::new(AuthorityRouter::new(Authority::new("ALL")));
    let cached = CacheLayer::new(ResolverConfig::default()).layer(Arc::clone(&router));
    let telemetry = Telemetry::new(MemorySink::new());
    let chain = FallbackChain::new(router, Arc::new(cached)).with_telemetry(telemetry);
    let err = chain.resolve("EPSG:1").await.unwrap_err();
    assert!(err.is_no_owning_authority());
    let _pool: PoolConfig = PoolConfig::default();
    let _cache: KeyedCache<CacheKey, Unit> = KeyedCache::unbounded();
    let _coverage = Coverage::Observed;
}
