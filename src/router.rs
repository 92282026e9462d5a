//! Front door dispatching codes to the resolver owning their authority.
//!
//! The routing table is an `ArcSwap` snapshot: lookups never lock, registrations publish a new
//! table with `rcu`. Registering a second resolver under an authority equivalent to an existing
//! route turns that route into a [`FallbackChain`] (existing resolver first); registering a code set
//! the route already reaches only extends the route's aliases.

use crate::category::{Catalogued, Category, CategorySet};
use crate::code::{split_candidates, Authority};
use crate::error::ResolveError;
use crate::fallback::{Coverage, FallbackChain};
use crate::resolver::{Resolver, SourceId, VisitSet};
use crate::telemetry::{LifecycleEvent, ResolverEvent, RouterEvent, Telemetry};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Route<T> {
    authority: Authority,
    resolver: Arc<dyn Resolver<T>>,
    /// Code sets already reachable through `resolver`.
    members: Vec<SourceId>,
}

impl<T> Clone for Route<T> {
    fn clone(&self) -> Self {
        Self {
            authority: self.authority.clone(),
            resolver: Arc::clone(&self.resolver),
            members: self.members.clone(),
        }
    }
}

/// Resolver dispatching each code to the registered resolver owning its scope.
pub struct AuthorityRouter<T: Catalogued> {
    authority: Authority,
    routes: ArcSwap<Vec<Route<T>>>,
    coverage: Coverage,
    source: SourceId,
    disposed: AtomicBool,
    telemetry: Telemetry,
}

impl<T: Catalogued> std::fmt::Debug for AuthorityRouter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.load();
        f.debug_struct("AuthorityRouter")
            .field("authority", &self.authority.title())
            .field("routes", &routes.iter().map(|route| route.authority.title()).collect::<Vec<_>>())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn address<T>(resolver: &Arc<dyn Resolver<T>>) -> usize {
    Arc::as_ptr(resolver) as *const () as usize
}

impl<T: Catalogued> AuthorityRouter<T> {
    /// Empty router answering to `authority` itself.
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            routes: ArcSwap::from_pointee(Vec::new()),
            coverage: Coverage::Union,
            source: SourceId::fresh(),
            disposed: AtomicBool::new(false),
            telemetry: Telemetry::default(),
        }
    }

    /// Coverage of the fallback chains built on registration.
    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Route codes scoped by the resolver's own authority to it.
    pub fn register(&self, resolver: Arc<dyn Resolver<T>>) -> Result<(), ResolveError> {
        let authority = resolver.authority().clone();
        self.register_as(authority, resolver)
    }

    /// Route codes scoped by `authority` to `resolver`.
    pub fn register_as(
        &self,
        authority: Authority,
        resolver: Arc<dyn Resolver<T>>,
    ) -> Result<(), ResolveError> {
        self.ensure_live()?;
        self.routes.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            let mut merged = false;
            for route in current.iter() {
                if merged || !route.authority.equivalent(&authority) {
                    next.push(route.clone());
                    continue;
                }
                merged = true;
                let mut route = route.clone();
                route.authority = route.authority.merge(&authority);
                if !route.members.contains(&resolver.source_id()) {
                    let chain = FallbackChain::with_coverage(
                        Arc::clone(&route.resolver),
                        Arc::clone(&resolver),
                        self.coverage,
                    )
                    .with_telemetry(self.telemetry.clone());
                    route.resolver = Arc::new(chain);
                    route.members.push(resolver.source_id());
                }
                next.push(route);
            }
            if !merged {
                next.push(Route {
                    authority: authority.clone(),
                    resolver: Arc::clone(&resolver),
                    members: vec![resolver.source_id()],
                });
            }
            next
        });
        tracing::debug!(target: "codebroker::router", authority = %authority, "route registered");
        self.telemetry.emit(ResolverEvent::Router(RouterEvent::Registered {
            authority: authority.title().to_owned(),
        }));
        Ok(())
    }

    /// Titles of the routed authorities, in registration order.
    pub fn authorities(&self) -> Vec<String> {
        self.routes.load().iter().map(|route| route.authority.title().to_owned()).collect()
    }

    /// Resolver owning `code` and the code with the owner's scope removed.
    ///
    /// Scopes are tried from the longest to the shortest. With no owner the error names the
    /// shortest scope tried, or no authority when the code has no scope at all.
    pub fn route<'c>(&self, code: &'c str) -> Result<(Arc<dyn Resolver<T>>, &'c str), ResolveError> {
        self.route_preferring(code, None)
    }

    fn route_preferring<'c>(
        &self,
        code: &'c str,
        category: Option<Category>,
    ) -> Result<(Arc<dyn Resolver<T>>, &'c str), ResolveError> {
        self.ensure_live()?;
        let routes = self.routes.load();
        let mut shortest = None;
        let mut first_match = None;
        for split in split_candidates(code) {
            shortest = Some(split.authority);
            let Some(route) = routes.iter().find(|route| route.authority.matches(split.authority))
            else {
                continue;
            };
            let claims = category.map_or(true, |category| route.resolver.categories().contains(category));
            if claims {
                tracing::debug!(target: "codebroker::router", code, authority = %route.authority, "routed");
                return Ok((Arc::clone(&route.resolver), split.local));
            }
            first_match.get_or_insert((Arc::clone(&route.resolver), split.local));
        }
        if let Some(found) = first_match {
            return Ok(found);
        }
        tracing::debug!(target: "codebroker::router", code, "no owning authority");
        self.telemetry.emit(ResolverEvent::Router(RouterEvent::Unrouted { code: code.to_owned() }));
        Err(ResolveError::no_owning_authority(code, shortest))
    }

    fn distinct_resolvers(&self) -> Vec<(Authority, Arc<dyn Resolver<T>>)> {
        let routes = self.routes.load();
        let mut seen = HashSet::new();
        routes
            .iter()
            .filter(|route| seen.insert(address(&route.resolver)))
            .map(|route| (route.authority.clone(), Arc::clone(&route.resolver)))
            .collect()
    }

    fn ensure_live(&self) -> Result<(), ResolveError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ResolveError::disposed(Some(self.authority.title())))
        } else {
            Ok(())
        }
    }

    /// Resolvers to search for `approximate`: the owner of its identifier if it carries one,
    /// otherwise every resolver claiming its category.
    fn find_candidates(&self, approximate: &T) -> Result<Vec<Arc<dyn Resolver<T>>>, ResolveError> {
        if let Some(identifier) = approximate.identifier() {
            match self.route_preferring(identifier, Some(approximate.category())) {
                Ok((resolver, _)) => return Ok(vec![resolver]),
                Err(err) if err.is_disposed() => return Err(err),
                Err(_) => {}
            }
        }
        self.ensure_live()?;
        Ok(self
            .distinct_resolvers()
            .into_iter()
            .map(|(_, resolver)| resolver)
            .filter(|resolver| resolver.categories().contains(approximate.category()))
            .collect())
    }
}

#[async_trait]
impl<T: Catalogued> Resolver<T> for AuthorityRouter<T> {
    fn authority(&self) -> &Authority {
        &self.authority
    }

    fn categories(&self) -> CategorySet {
        self.routes
            .load()
            .iter()
            .fold(CategorySet::empty(), |claimed, route| claimed.union(&route.resolver.categories()))
    }

    fn source_id(&self) -> SourceId {
        self.source
    }

    async fn resolve(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        let (resolver, local) = self.route(code)?;
        resolver.resolve(local).await
    }

    async fn resolve_as(&self, code: &str, category: Category) -> Result<Arc<T>, ResolveError> {
        let (resolver, local) = self.route_preferring(code, Some(category))?;
        resolver.resolve_as(local, category).await
    }

    async fn resolve_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        let (resolver, source) = self.route(source)?;
        let target = match self.route(target) {
            Ok((owner, local)) if address(&owner) == address(&resolver) => local,
            _ => target,
        };
        resolver.resolve_pair(source, target).await
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        let (resolver, local) = self.route(code)?;
        resolver.describe(local).await
    }

    async fn list_codes_guarded(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        self.ensure_live()?;
        if !visiting.enter(self) {
            tracing::debug!(target: "codebroker::router", authority = %self.authority, "router already being listed");
            return Ok(BTreeSet::new());
        }
        let mut codes = BTreeSet::new();
        let mut outcome = Ok(());
        for (authority, resolver) in self.distinct_resolvers() {
            match resolver.list_codes_guarded(category, visiting).await {
                Ok(listed) => codes.extend(listed.iter().map(|code| authority.scoped(code))),
                Err(err) if err.is_disposed() => {
                    outcome = Err(err);
                    break;
                }
                Err(err) => {
                    tracing::warn!(target: "codebroker::router", authority = %authority, error = %err, "listing failed");
                }
            }
        }
        visiting.leave(self);
        outcome.map(|()| codes)
    }

    async fn find(&self, approximate: &Arc<T>) -> Result<Option<Arc<T>>, ResolveError> {
        for resolver in self.find_candidates(approximate)? {
            match resolver.find(approximate).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(err) if err.is_disposed() => return Err(err),
                Err(err) => {
                    tracing::debug!(target: "codebroker::router", error = %err, "find failed, trying next")
                }
            }
        }
        Ok(None)
    }

    async fn find_identifier(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        for resolver in self.find_candidates(approximate)? {
            match resolver.find_identifier(approximate).await {
                Ok(Some(code)) => return Ok(Some(resolver.authority().scoped(&code))),
                Ok(None) => {}
                Err(err) if err.is_disposed() => return Err(err),
                Err(err) => {
                    tracing::debug!(target: "codebroker::router", error = %err, "find failed, trying next")
                }
            }
        }
        Ok(None)
    }

    async fn is_available(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        for (_, resolver) in self.distinct_resolvers() {
            if resolver.is_available().await {
                return true;
            }
        }
        false
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let routes = self.distinct_resolvers();
        self.routes.store(Arc::new(Vec::new()));
        for (_, resolver) in &routes {
            resolver.dispose();
        }
        tracing::info!(
            target: "codebroker::router",
            authority = %self.authority,
            resolvers = routes.len(),
            "router disposed"
        );
        self.telemetry.emit(ResolverEvent::Lifecycle(LifecycleEvent::Disposed {
            authority: self.authority.title().to_owned(),
        }));
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
