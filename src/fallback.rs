//! Primary/secondary resolver chains.
//!
//! A chain asks its primary first. When the primary does not know the code (`NotFound`,
//! `NoOwningAuthority`) or fails to build it (`GenerationFailed`), the failure is recorded and the
//! secondary is asked. If the secondary does not know the code either, the caller sees the
//! primary's error, which is usually the more informative one. `Disposed` never falls back.
//!
//! [`FallbackChain::build`] turns a flat list of resolvers into one chain per authority:
//!
//! ```text
//!   [EPSG(a), ESRI(x), EPSG(b), EPSG(c)]  ──►  [Chain(a, Chain(b, c)), x]
//! ```

use crate::category::{Catalogued, Category, CategorySet};
use crate::code::Authority;
use crate::error::ResolveError;
use crate::resolver::{Resolver, SourceId, VisitSet};
use crate::telemetry::{FallbackEvent, LifecycleEvent, ResolverEvent, Telemetry};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How a chain derives the categories it claims from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Everything any member claims.
    #[default]
    Union,
    /// Only what every member claims; used for auto-discovered resolvers whose claims are not
    /// trusted to be complete.
    Observed,
}

/// Resolver trying `primary`, then `secondary`.
pub struct FallbackChain<T: Catalogued> {
    primary: Arc<dyn Resolver<T>>,
    secondary: Arc<dyn Resolver<T>>,
    categories: CategorySet,
    coverage: Coverage,
    source: SourceId,
    failures: AtomicU64,
    disposed: AtomicBool,
    telemetry: Telemetry,
}

impl<T: Catalogued> std::fmt::Debug for FallbackChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("authority", &self.primary.authority().title())
            .field("secondary", &self.secondary.authority().title())
            .field("coverage", &self.coverage)
            .field("failures", &self.failures())
            .finish()
    }
}

impl<T: Catalogued> FallbackChain<T> {
    /// Chain claiming the union of both members' categories.
    pub fn new(primary: Arc<dyn Resolver<T>>, secondary: Arc<dyn Resolver<T>>) -> Self {
        Self::with_coverage(primary, secondary, Coverage::Union)
    }

    pub fn with_coverage(
        primary: Arc<dyn Resolver<T>>,
        secondary: Arc<dyn Resolver<T>>,
        coverage: Coverage,
    ) -> Self {
        let categories = match coverage {
            Coverage::Union => primary.categories().union(&secondary.categories()),
            Coverage::Observed => primary.categories().intersection(&secondary.categories()),
        };
        Self {
            primary,
            secondary,
            categories,
            coverage,
            source: SourceId::fresh(),
            failures: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            telemetry: Telemetry::default(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn primary(&self) -> &Arc<dyn Resolver<T>> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn Resolver<T>> {
        &self.secondary
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    /// Times the primary failed and the secondary was consulted.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// One resolver per group of equivalent authorities, in first-seen order. Members of a group
    /// are chained in the order given; members exposing the same codes as an earlier member are
    /// dropped.
    pub fn build(resolvers: impl IntoIterator<Item = Arc<dyn Resolver<T>>>) -> Vec<Arc<dyn Resolver<T>>> {
        Self::build_with(resolvers, Coverage::Union, &Telemetry::default())
    }

    /// [`build`](Self::build) for auto-discovered resolvers: chains claim only the categories
    /// every member claims.
    pub fn build_discovered(
        resolvers: impl IntoIterator<Item = Arc<dyn Resolver<T>>>,
    ) -> Vec<Arc<dyn Resolver<T>>> {
        Self::build_with(resolvers, Coverage::Observed, &Telemetry::default())
    }

    pub fn build_with(
        resolvers: impl IntoIterator<Item = Arc<dyn Resolver<T>>>,
        coverage: Coverage,
        telemetry: &Telemetry,
    ) -> Vec<Arc<dyn Resolver<T>>> {
        let mut groups: Vec<Vec<Arc<dyn Resolver<T>>>> = Vec::new();
        for resolver in resolvers {
            let group = groups.iter_mut().find(|group| {
                group.iter().any(|member| member.authority().equivalent(resolver.authority()))
            });
            match group {
                Some(group) => {
                    if group.iter().any(|member| member.same_codes(&*resolver)) {
                        tracing::debug!(
                            target: "codebroker::fallback",
                            authority = %resolver.authority(),
                            "dropping resolver exposing the same codes as an earlier one"
                        );
                    } else {
                        group.push(resolver);
                    }
                }
                None => groups.push(vec![resolver]),
            }
        }

        let mut chains = Vec::with_capacity(groups.len());
        for mut group in groups {
            let Some(mut chain) = group.pop() else { continue };
            while let Some(primary) = group.pop() {
                chain = Arc::new(
                    FallbackChain::with_coverage(primary, chain, coverage)
                        .with_telemetry(telemetry.clone()),
                );
            }
            chains.push(chain);
        }
        chains
    }

    fn ensure_live(&self) -> Result<(), ResolveError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ResolveError::disposed(Some(self.primary.authority().title())))
        } else {
            Ok(())
        }
    }

    fn record_failure(&self, code: &str, err: &ResolveError) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        let authority = self.primary.authority().title();
        tracing::warn!(
            target: "codebroker::fallback",
            authority = %authority,
            code = %code,
            error = %err,
            failures,
            "primary resolver failed, trying fallback"
        );
        self.telemetry.emit(ResolverEvent::Fallback(FallbackEvent::Activated {
            code: code.to_owned(),
            authority: authority.to_owned(),
            failures,
        }));
    }

    /// Run `call` on the primary, then on the secondary per the chain's failure policy.
    async fn with_fallback<R, F, Fut>(&self, code: &str, call: F) -> Result<R, ResolveError>
    where
        F: Fn(Arc<dyn Resolver<T>>) -> Fut + Send,
        Fut: Future<Output = Result<R, ResolveError>> + Send,
    {
        self.ensure_live()?;
        let primary_err = match call(Arc::clone(&self.primary)).await {
            Ok(value) => return Ok(value),
            Err(err) if err.triggers_fallback() => err,
            Err(err) => return Err(err),
        };
        self.record_failure(code, &primary_err);
        match call(Arc::clone(&self.secondary)).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_unrecognized() => Err(primary_err),
            Err(err) => Err(err),
        }
    }

    /// Like `with_fallback`, but an empty primary answer also moves on to the secondary.
    async fn first_found<R, F, Fut>(&self, call: F) -> Result<Option<R>, ResolveError>
    where
        F: Fn(Arc<dyn Resolver<T>>) -> Fut + Send,
        Fut: Future<Output = Result<Option<R>, ResolveError>> + Send,
    {
        self.ensure_live()?;
        match call(Arc::clone(&self.primary)).await {
            Ok(Some(found)) => Ok(Some(found)),
            Ok(None) => call(Arc::clone(&self.secondary)).await,
            Err(err) if err.triggers_fallback() => {
                self.record_failure("<find>", &err);
                match call(Arc::clone(&self.secondary)).await {
                    Err(fallback) if fallback.is_unrecognized() => Err(err),
                    other => other,
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<T: Catalogued> Resolver<T> for FallbackChain<T> {
    fn authority(&self) -> &Authority {
        self.primary.authority()
    }

    fn categories(&self) -> CategorySet {
        self.categories.clone()
    }

    fn source_id(&self) -> SourceId {
        self.source
    }

    async fn resolve(&self, code: &str) -> Result<Arc<T>, ResolveError> {
        self.with_fallback(code, |resolver| async move { resolver.resolve(code).await }).await
    }

    async fn resolve_as(&self, code: &str, category: Category) -> Result<Arc<T>, ResolveError> {
        self.ensure_live()?;
        match (
            self.primary.categories().contains(category),
            self.secondary.categories().contains(category),
        ) {
            (true, true) => {
                self.with_fallback(code, |resolver| async move {
                    resolver.resolve_as(code, category).await
                })
                .await
            }
            (true, false) => self.primary.resolve_as(code, category).await,
            (false, true) => self.secondary.resolve_as(code, category).await,
            (false, false) => Err(ResolveError::not_found(code, Some(self.authority().title()))),
        }
    }

    async fn resolve_pair(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Arc<Vec<Arc<T>>>, ResolveError> {
        self.with_fallback(source, |resolver| async move {
            resolver.resolve_pair(source, target).await
        })
        .await
    }

    async fn describe(&self, code: &str) -> Result<String, ResolveError> {
        self.with_fallback(code, |resolver| async move { resolver.describe(code).await }).await
    }

    async fn list_codes_guarded(
        &self,
        category: Category,
        visiting: &mut VisitSet,
    ) -> Result<BTreeSet<String>, ResolveError> {
        self.ensure_live()?;
        let primary = self.primary.list_codes_guarded(category, visiting).await;
        let secondary = self.secondary.list_codes_guarded(category, visiting).await;
        match (primary, secondary) {
            (Ok(mut codes), Ok(more)) => {
                codes.extend(more);
                Ok(codes)
            }
            (Ok(codes), Err(err)) | (Err(err), Ok(codes)) => {
                tracing::warn!(target: "codebroker::fallback", error = %err, "partial code listing");
                Ok(codes)
            }
            (Err(err), Err(_)) => Err(err),
        }
    }

    async fn find(&self, approximate: &Arc<T>) -> Result<Option<Arc<T>>, ResolveError> {
        self.first_found(|resolver| async move { resolver.find(approximate).await }).await
    }

    async fn find_identifier(&self, approximate: &Arc<T>) -> Result<Option<String>, ResolveError> {
        self.first_found(|resolver| async move { resolver.find_identifier(approximate).await })
            .await
    }

    async fn is_available(&self) -> bool {
        !self.is_disposed()
            && (self.primary.is_available().await || self.secondary.is_available().await)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.primary.dispose();
        self.secondary.dispose();
        let authority = self.primary.authority().title().to_owned();
        tracing::info!(target: "codebroker::fallback", authority = %authority, "fallback chain disposed");
        self.telemetry.emit(ResolverEvent::Lifecycle(LifecycleEvent::Disposed { authority }));
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
