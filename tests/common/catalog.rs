//! In-memory catalog used as the backing store of integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use codebroker::{
    Authority, BackingStore, BoxError, Catalogued, Category, CategorySet, PooledCachingResolver,
    ResolverConfig, StoreError, WorkerFactory,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CRS: Category = Category::new("crs");
pub const DATUM: Category = Category::new("datum");
pub const UNIT: Category = Category::new("unit");

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub category: Category,
    pub code: Option<String>,
    pub name: String,
    pub params: Vec<i64>,
}

impl Definition {
    /// A definition without identity, as a caller would build it by hand.
    pub fn unnamed(category: Category, params: Vec<i64>) -> Self {
        Self { category, code: None, name: "unnamed".into(), params }
    }
}

impl Catalogued for Definition {
    fn category(&self) -> Category {
        self.category
    }

    fn identifier(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn matches(&self, other: &Self) -> bool {
        self.category == other.category && self.params == other.params
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.category.name().hash(&mut hasher);
        self.params.hash(&mut hasher);
        hasher.finish()
    }
}

/// Rows of one authority plus counters shared by every worker reading them.
#[derive(Debug, Default)]
pub struct Catalog {
    authority: String,
    rows: BTreeMap<String, (Category, String, Vec<i64>)>,
    broken: HashSet<String>,
    latency: Duration,
    pub generated: AtomicUsize,
    pub requested: Mutex<Vec<String>>,
}

impl Catalog {
    pub fn new(authority: &str) -> Self {
        Self { authority: authority.to_owned(), ..Self::default() }
    }

    pub fn row(mut self, code: &str, category: Category, name: &str, params: &[i64]) -> Self {
        self.rows.insert(code.to_owned(), (category, name.to_owned(), params.to_vec()));
        self
    }

    /// Generating `code` fails with an unexpected error.
    pub fn broken(mut self, code: &str) -> Self {
        self.broken.insert(code.to_owned());
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    fn definition(&self, code: &str) -> Option<Definition> {
        self.rows.get(code).map(|(category, name, params)| Definition {
            category: *category,
            code: Some(format!("{}:{}", self.authority, code)),
            name: name.clone(),
            params: params.clone(),
        })
    }
}

/// A few rows in the shape of a geodetic registry.
pub fn epsg() -> Catalog {
    Catalog::new("EPSG")
        .row("4326", CRS, "WGS 84", &[6326, 9122])
        .row("4269", CRS, "NAD83", &[6269, 9122])
        .row("6326", DATUM, "World Geodetic System 1984", &[7030])
        .row("9001", UNIT, "metre", &[1])
}

pub fn esri() -> Catalog {
    Catalog::new("ESRI").row("102100", CRS, "WGS 1984 Web Mercator", &[6326, 3857])
}

/// One connection to a [`Catalog`].
pub struct CatalogStore {
    catalog: Arc<Catalog>,
}

#[async_trait]
impl BackingStore<Definition> for CatalogStore {
    async fn generate(&mut self, code: &str) -> Result<Definition, StoreError> {
        self.catalog.generated.fetch_add(1, Ordering::SeqCst);
        self.catalog.requested.lock().unwrap().push(code.to_owned());
        if !self.catalog.latency.is_zero() {
            tokio::time::sleep(self.catalog.latency).await;
        }
        if self.catalog.broken.contains(code) {
            return Err(StoreError::failed(format!("corrupt row {code}")));
        }
        self.catalog.definition(code).ok_or(StoreError::NotFound)
    }

    async fn generate_pair(
        &mut self,
        source: &str,
        target: &str,
    ) -> Result<Vec<Definition>, StoreError> {
        match (self.catalog.definition(source), self.catalog.definition(target)) {
            (Some(source), Some(target)) => Ok(vec![source, target]),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn list_codes(&mut self, category: Category) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .catalog
            .rows
            .iter()
            .filter(|(_, (kind, _, _))| category.is_any() || *kind == category)
            .map(|(code, _)| code.clone())
            .collect())
    }

    async fn describe(&mut self, code: &str) -> Result<String, StoreError> {
        self.catalog.rows.get(code).map(|(_, name, _)| name.clone()).ok_or(StoreError::NotFound)
    }
}

/// Opens [`CatalogStore`]s and counts them.
pub struct CatalogFactory {
    pub catalog: Arc<Catalog>,
    pub opened: AtomicUsize,
}

impl CatalogFactory {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog, opened: AtomicUsize::new(0) }
    }
}

/// Shared handle to a [`CatalogFactory`], so tests keep reading its counters.
#[derive(Clone)]
pub struct FactoryHandle(pub Arc<CatalogFactory>);

#[async_trait]
impl WorkerFactory for FactoryHandle {
    type Worker = CatalogStore;

    async fn create(&self) -> Result<CatalogStore, BoxError> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CatalogStore { catalog: Arc::clone(&self.0.catalog) })
    }
}

pub type CatalogResolver = PooledCachingResolver<Definition, FactoryHandle>;

/// Pooled caching resolver over `catalog`, answering to `authority`.
pub fn pooled(
    authority: Authority,
    catalog: Arc<Catalog>,
    config: ResolverConfig,
) -> (Arc<CatalogResolver>, Arc<CatalogFactory>) {
    let factory = Arc::new(CatalogFactory::new(catalog));
    let resolver = PooledCachingResolver::builder(authority, FactoryHandle(Arc::clone(&factory)))
        .categories(CategorySet::of([CRS, DATUM, UNIT]))
        .config(config)
        .build();
    (Arc::new(resolver), factory)
}
