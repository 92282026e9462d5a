//! The resolver contract shared by every node of a resolver graph.

use crate::category::{Catalogued, Category, CategorySet};
use crate::code::Authority;
use crate::error::ResolveError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of the code set a node exposes.
///
/// Leaf resolvers get a fresh id; transparent wrappers (a cache in front of another resolver)
/// report the id of what they wrap, so chains can tell that two nodes would answer alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate an id no other node has.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Nodes whose code listing is in progress on the current call path.
///
/// Passed down explicitly so a router that can reach itself terminates instead of recursing.
#[derive(Debug, Default)]
pub struct VisitSet {
    active: HashSet<usize>,
}

impl VisitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `node` as in progress. Returns `false` if it already was.
    pub fn enter<N: ?Sized>(&mut self, node: &N) -> bool {
        self.active.insert(address(node))
    }

    /// Mark `node` as finished.
    pub fn leave<N: ?Sized>(&mut self, node: &N) {
        self.active.remove(&address(node));
    }

    pub fn contains<N: ?Sized>(&self, node: &N) -> bool {
        self.active.contains(&address(node))
    }
}

fn address<N: ?Sized>(node: &N) -> usize {
    node as *const N as *const () as usize
}

/// A node turning codes into shared objects of type `T`.
///
/// Implemented by the caching leaves, by [`FallbackChain`](crate::FallbackChain) and by
/// [`AuthorityRouter`](crate::AuthorityRouter). Nodes are shared as `Arc<dyn Resolver<T>>`.
/// Once [`dispose`](Resolver::dispose) has been called every operation fails with
/// [`ResolveError::Disposed`].
#[async_trait]
pub trait Resolver<T: Catalogued>: Send + Sync + 'static {
    /// Authority whose codes this node resolves.
    fn authority(&self) -> &Authority;

    /// Categories this node claims to produce.
    fn categories(&self) -> CategorySet;

    /// Identity of the exposed code set.
    fn source_id(&self) -> SourceId;

    /// Whether `other` exposes exactly the codes this node exposes.
    fn same_codes(&self, other: &dyn Resolver<T>) -> bool {
        self.source_id() == other.source_id()
    }

    /// Resolve one code.
    async fn resolve(&self, code: &str) -> Result<Arc<T>, ResolveError>;

    /// Resolve one code, requiring the result to be usable as `category`.
    ///
    /// Fails with `NotFound` when the node does not claim the category or the object is of
    /// another kind. This is a filter over [`resolve`](Resolver::resolve); it never creates a
    /// separate cache entry.
    async fn resolve_as(&self, code: &str, category: Category) -> Result<Arc<T>, ResolveError> {
        if !self.categories().contains(category) {
            return Err(ResolveError::not_found(code, Some(self.authority().title())));
        }
        let object = self.resolve(code).await?;
        if object.is_a(category) {
            Ok(object)
        } else {
            Err(ResolveError::not_found(code, Some(self.authority().title())))
        }
    }

    /// Objects relating two codes, e.g. the operations between two reference systems.
    async fn resolve_pair(&self, source: &str, target: &str)
        -> Result<Arc<Vec<Arc<T>>>, ResolveError>;

    /// Human-readable description of a code.
    async fn describe(&self, code: &str) -> Result<String, ResolveError>;

    /// Every code this node can resolve as `category`.
    async fn list_codes(&self, category: Category) -> Result<BTreeSet<String>, ResolveError> {
        let mut visiting = VisitSet::new();
        self.list_codes_guarded(category, &mut visiting).await
    }

    /// [`list_codes`](Resolver::list_codes) with the set of nodes already being listed.
    async fn list_codes_guarded(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError>;

    /// Cached object equal to `approximate` ignoring metadata, if any code yields one.
    async fn find(&self, approximate: &Arc<T>) -> Result<Option<Arc<T>>, ResolveError>;

    /// Code of the object [`find`](Resolver::find) returns, scoped with the owning authority.
    async fn find_identifier(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError>;

    /// Whether the backing data can currently be reached.
    async fn is_available(&self) -> bool;

    /// Tear the node down. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}
