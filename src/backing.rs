//! Interface to the data source behind a pooled resolver.

use crate::category::Category;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// A stateful connection to a backing data source, used by one caller at a time.
///
/// Workers of a [`WorkerPool`](crate::pool::WorkerPool) implement this to feed a
/// [`PooledCachingResolver`](crate::PooledCachingResolver). Codes arrive trimmed of the owning
/// authority's scope.
#[async_trait]
pub trait BackingStore<T: Send + 'static>: Send + 'static {
    /// Build the object for `code`.
    async fn generate(&mut self, code: &str) -> Result<T, StoreError>;

    /// Build the objects relating `source` to `target`.
    async fn generate_pair(&mut self, _source: &str, _target: &str) -> Result<Vec<T>, StoreError> {
        Err(StoreError::NotFound)
    }

    /// Every code the store can build as `category`, unscoped.
    async fn list_codes(&mut self, category: Category) -> Result<BTreeSet<String>, StoreError>;

    /// Human-readable description of `code`.
    async fn describe(&mut self, code: &str) -> Result<String, StoreError>;

    /// Whether the source can currently be reached.
    async fn is_available(&mut self) -> bool {
        true
    }
}
