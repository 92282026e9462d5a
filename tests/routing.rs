mod common;

use codebroker::{
    Authority, AuthorityRouter, CacheLayer, Category, FallbackChain, Resolver, ResolverConfig,
    ResolverService,
};
use common::catalog::{self, Catalog, Definition, CRS, UNIT};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tower_layer::Layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

fn leaf(catalog: Catalog, authority: &str) -> (Arc<dyn Resolver<Definition>>, Arc<Catalog>) {
    let rows = Arc::new(catalog);
    let (resolver, _) =
        catalog::pooled(Authority::new(authority), Arc::clone(&rows), ResolverConfig::default());
    (resolver as Arc<dyn Resolver<Definition>>, rows)
}

fn registry() -> (AuthorityRouter<Definition>, Arc<Catalog>, Arc<Catalog>) {
    let (epsg, epsg_rows) = leaf(catalog::epsg(), "EPSG");
    let (esri, esri_rows) = leaf(catalog::esri(), "ESRI");
    let router = AuthorityRouter::new(Authority::new("ALL"));
    router.register(epsg).unwrap();
    router.register(esri).unwrap();
    (router, epsg_rows, esri_rows)
}

#[tokio::test]
async fn router_dispatches_to_the_owning_leaf() {
    let (router, epsg, esri) = registry();
    let wgs84 = router.resolve("EPSG:4326").await.unwrap();
    assert_eq!(wgs84.code.as_deref(), Some("EPSG:4326"));
    assert_eq!(epsg.requested(), vec!["4326"]);
    assert!(esri.requested().is_empty());

    let mercator = router.resolve("esri:102100").await.unwrap();
    assert_eq!(mercator.name, "WGS 1984 Web Mercator");
}

#[tokio::test]
async fn unowned_scope_is_reported_with_its_authority() {
    let (router, epsg, esri) = registry();
    let err = router.resolve("unknown:1").await.unwrap_err();
    assert!(err.is_no_owning_authority());
    assert_eq!(err.authority(), Some("unknown"));
    assert_eq!(err.code(), Some("unknown:1"));
    assert_eq!(epsg.generated() + esri.generated(), 0);
}

#[tokio::test]
async fn second_leaf_of_an_authority_is_a_fallback() {
    let (partial, partial_rows) = leaf(
        Catalog::new("EPSG").row("4326", CRS, "WGS 84 (local copy)", &[6326, 9122]).broken("9001"),
        "EPSG",
    );
    let (full, full_rows) = leaf(
        Catalog::new("EPSG")
            .row("4326", CRS, "WGS 84", &[6326, 9122])
            .row("4269", CRS, "NAD83", &[6269, 9122]),
        "EPSG",
    );
    let router = AuthorityRouter::new(Authority::new("ALL"));
    router.register(partial).unwrap();
    router.register(full).unwrap();

    assert_eq!(router.resolve("EPSG:4326").await.unwrap().name, "WGS 84 (local copy)");
    assert_eq!(router.resolve("EPSG:4269").await.unwrap().name, "NAD83");
    assert_eq!(partial_rows.requested(), vec!["4326", "4269"]);
    assert_eq!(full_rows.requested(), vec!["4269"]);

    let err = router.resolve("EPSG:9001").await.unwrap_err();
    assert!(err.is_generation_failed(), "primary diagnosis should surface: {err}");

    let codes = router.list_codes(CRS).await.unwrap();
    assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["EPSG:4269", "EPSG:4326"]);
}

#[tokio::test]
async fn built_chains_can_be_routed() {
    let (a, _) = leaf(Catalog::new("EPSG"), "EPSG");
    let (b, _) = leaf(catalog::epsg(), "epsg");
    let (x, _) = leaf(catalog::esri(), "ESRI");
    let router = AuthorityRouter::new(Authority::new("ALL"));
    for resolver in FallbackChain::build(vec![a, x, b]) {
        router.register(resolver).unwrap();
    }
    assert_eq!(router.authorities(), vec!["EPSG", "ESRI"]);
    assert_eq!(router.resolve("EPSG:9001").await.unwrap().category, UNIT);
}

#[tokio::test]
async fn nested_router_listing_terminates() {
    let (router, _, _) = registry();
    let router = Arc::new(router);
    router.register_as(Authority::new("ALL"), router.clone()).unwrap();
    let all = router.list_codes(Category::ANY).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.contains("ESRI:102100"));
    router.dispose();
}

#[tokio::test]
async fn find_through_the_router_returns_scoped_codes() {
    let (router, _, _) = registry();
    let probe = Arc::new(Definition::unnamed(CRS, vec![6326, 3857]));
    let code = router.find_identifier(&probe).await.unwrap();
    assert_eq!(code.as_deref(), Some("ESRI:102100"));
    assert!(router.find(&Arc::new(Definition::unnamed(UNIT, vec![42]))).await.unwrap().is_none());
}

#[tokio::test]
async fn tower_service_over_a_cached_router() {
    let (router, epsg, _) = registry();
    let router: Arc<dyn Resolver<Definition>> = Arc::new(router);
    let cached: Arc<dyn Resolver<Definition>> =
        Arc::new(CacheLayer::new(ResolverConfig::default()).layer(router));
    let service = ResolverService::new(cached);
    let first = service.clone().oneshot("EPSG:6326".to_owned()).await.unwrap();
    let second = service.oneshot("EPSG:6326".to_owned()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(epsg.generated(), 1);
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn fallback_and_disposal_are_logged() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (empty, _) = leaf(Catalog::new("EPSG"), "EPSG");
    let (full, _) = leaf(catalog::epsg(), "EPSG");
    let router = AuthorityRouter::new(Authority::new("ALL"));
    router.register(empty).unwrap();
    router.register(full).unwrap();
    router.resolve("EPSG:4326").await.unwrap();
    router.dispose();

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("primary resolver failed, trying fallback"), "logs: {logs}");
    assert!(logs.contains("codebroker::fallback"));
    assert!(logs.contains("router disposed"));
}
