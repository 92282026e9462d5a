//! Resolve codes through a router over two pooled, cached authorities.
//!
//! Run with `cargo run --example router_demo`.

use async_trait::async_trait;
use codebroker::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const CRS: Category = Category::new("crs");

#[derive(Debug)]
struct Crs {
    name: String,
    datum: u32,
}

impl Catalogued for Crs {
    fn category(&self) -> Category {
        CRS
    }
    fn matches(&self, other: &Self) -> bool {
        self.datum == other.datum
    }
    fn fingerprint(&self) -> u64 {
        u64::from(self.datum)
    }
}

/// A pretend database connection: slow and not shareable.
struct Connection {
    rows: Arc<BTreeMap<&'static str, (&'static str, u32)>>,
}

#[async_trait]
impl BackingStore<Crs> for Connection {
    async fn generate(&mut self, code: &str) -> Result<Crs, StoreError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (name, datum) = self.rows.get(code).ok_or(StoreError::NotFound)?;
        Ok(Crs { name: (*name).to_owned(), datum: *datum })
    }

    async fn list_codes(&mut self, _category: Category) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.rows.keys().map(|code| (*code).to_owned()).collect())
    }

    async fn describe(&mut self, code: &str) -> Result<String, StoreError> {
        self.rows.get(code).map(|(name, _)| (*name).to_owned()).ok_or(StoreError::NotFound)
    }
}

fn authority(
    name: &str,
    rows: &[(&'static str, &'static str, u32)],
    telemetry: &Telemetry,
) -> Arc<dyn Resolver<Crs>> {
    let rows: Arc<BTreeMap<_, _>> =
        Arc::new(rows.iter().map(|(code, name, datum)| (*code, (*name, *datum))).collect());
    let factory = factory_fn(move || {
        let rows = Arc::clone(&rows);
        async move { Ok::<_, BoxError>(Connection { rows }) }
    });
    Arc::new(
        PooledCachingResolver::builder(Authority::new(name), factory)
            .categories(CategorySet::of([CRS]))
            .telemetry(telemetry.clone())
            .build(),
    )
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    let events = MemorySink::new();
    let telemetry = Telemetry::new(events.clone());
    let router = AuthorityRouter::new(Authority::new("ALL")).with_telemetry(telemetry.clone());
    router.register(authority(
        "EPSG",
        &[("4326", "WGS 84", 6326), ("4269", "NAD83", 6269)],
        &telemetry,
    ))?;
    router.register(authority("ESRI", &[("102100", "WGS 1984 Web Mercator", 3857)], &telemetry))?;

    for code in ["EPSG:4326", "ESRI:102100", "EPSG:4326", "unknown:1"] {
        match router.resolve(code).await {
            Ok(crs) => println!("{code:>12} -> {}", crs.name),
            Err(err) => println!("{code:>12} -> error: {err}"),
        }
    }

    let probe = Arc::new(Crs { name: "hand-built".into(), datum: 6269 });
    println!("probe matches {:?}", router.find_identifier(&probe).await?);
    println!("all codes: {:?}", router.list_codes(CRS).await?);

    router.dispose();
    println!("\nCaptured telemetry events:");
    for event in events.events() {
        println!("  - {event}");
    }
    Ok(())
}
