//! Bounded pool of stateful workers.
//!
//! Capacity is a `tokio::sync::Semaphore` with `max_active` permits: [`WorkerPool::borrow`]
//! awaits a permit (there is no timeout), then reuses the most recently returned idle worker that
//! passes validation or creates a fresh one. The returned [`PooledWorker`] hands the worker back
//! when dropped, on every exit path.
//!
//! ```text
//!   create ──► activate ──► (borrowed) ──► passivate ──► idle ──► validate ──► activate ...
//!                                │                        │
//!                                └── invalidate ──► destroy ◄── evict / excess / dispose
//! ```

mod config;

pub use config::{PoolConfig, PoolConfigBuilder};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{BoxError, PoolError};
use crate::lock_unpoisoned;
use crate::telemetry::{DestroyReason, PoolEvent, ResolverEvent, Telemetry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

/// Lifecycle hooks for the workers of a [`WorkerPool`].
///
/// Only `create` is required. The other hooks default to accepting every worker.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// The pooled worker, typically a connection to a backing store.
    type Worker: Send + 'static;

    /// Build a new worker.
    async fn create(&self) -> Result<Self::Worker, BoxError>;

    /// Whether an idle worker is still usable. Invalid workers are destroyed.
    fn validate(&self, _worker: &mut Self::Worker) -> bool {
        true
    }

    /// Prepare a worker for a borrower.
    fn activate(&self, _worker: &mut Self::Worker) -> Result<(), BoxError> {
        Ok(())
    }

    /// Reset a returned worker before it becomes idle.
    fn passivate(&self, _worker: &mut Self::Worker) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release a worker's resources.
    fn destroy(&self, _worker: Self::Worker) {}
}

/// Factory built from an async closure; every other hook keeps its default.
///
/// ```
/// use codebroker::pool::{factory_fn, PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::new(
///     factory_fn(|| async { Ok::<_, codebroker::BoxError>(Vec::<u8>::new()) }),
///     PoolConfig::default(),
/// );
/// # drop(pool);
/// ```
pub fn factory_fn<C>(create: C) -> FactoryFn<C> {
    FactoryFn { create }
}

/// See [`factory_fn`].
#[derive(Clone, Copy, Debug)]
pub struct FactoryFn<C> {
    create: C,
}

#[async_trait]
impl<C, Fut, W> WorkerFactory for FactoryFn<C>
where
    C: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<W, BoxError>> + Send,
    W: Send + 'static,
{
    type Worker = W;

    async fn create(&self) -> Result<W, BoxError> {
        (self.create)().await
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers created since the pool was built.
    pub created: u64,
    /// Workers destroyed since the pool was built.
    pub destroyed: u64,
    /// Workers currently borrowed.
    pub active: usize,
    /// Workers currently idle.
    pub idle: usize,
    /// Configured borrow limit.
    pub max_active: usize,
}

struct IdleWorker<W> {
    worker: W,
    since: u64,
}

struct Shared<F: WorkerFactory> {
    factory: F,
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
    permits: Arc<Semaphore>,
    // Most recently returned at the back.
    idle: Mutex<VecDeque<IdleWorker<F::Worker>>>,
    // Written only while `idle` is locked so returns cannot race disposal.
    disposed: AtomicBool,
    active: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl<F: WorkerFactory> Shared<F> {
    fn destroy(&self, worker: F::Worker, reason: DestroyReason) {
        self.factory.destroy(worker);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "codebroker::pool", %reason, "worker destroyed");
        self.telemetry.emit(ResolverEvent::Pool(PoolEvent::Destroyed { reason }));
    }

    async fn create(&self) -> Result<F::Worker, PoolError> {
        let worker = self.factory.create().await.map_err(|err| {
            tracing::warn!(target: "codebroker::pool", error = %err, "worker creation failed");
            PoolError::Create(err)
        })?;
        self.created.fetch_add(1, Ordering::Relaxed);
        let active = self.active.load(Ordering::Relaxed);
        let idle = lock_unpoisoned(&self.idle).len();
        tracing::debug!(target: "codebroker::pool", active, idle, "worker created");
        self.telemetry.emit(ResolverEvent::Pool(PoolEvent::Created { active, idle }));
        Ok(worker)
    }

    fn give_back(&self, mut worker: F::Worker, invalidated: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if invalidated {
            self.destroy(worker, DestroyReason::Invalidated);
            return;
        }
        if let Err(err) = self.factory.passivate(&mut worker) {
            tracing::warn!(target: "codebroker::pool", error = %err, "worker passivation failed");
            self.destroy(worker, DestroyReason::LifecycleFailure);
            return;
        }
        let rejected = {
            let mut idle = lock_unpoisoned(&self.idle);
            if self.disposed.load(Ordering::Acquire) {
                Some((worker, DestroyReason::Disposed))
            } else if idle.len() >= self.config.max_idle() {
                Some((worker, DestroyReason::ExcessIdle))
            } else {
                idle.push_back(IdleWorker { worker, since: self.clock.now_millis() });
                None
            }
        };
        if let Some((worker, reason)) = rejected {
            self.destroy(worker, reason);
        }
    }
}

impl<F: WorkerFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        if let Some(evictor) = lock_unpoisoned(&self.evictor).take() {
            evictor.abort();
        }
        let idle = std::mem::take(&mut *lock_unpoisoned(&self.idle));
        for entry in idle {
            self.factory.destroy(entry.worker);
        }
    }
}

/// Bounded pool of workers built by a [`WorkerFactory`]. Clones share the same pool.
pub struct WorkerPool<F: WorkerFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: WorkerFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<F: WorkerFactory> std::fmt::Debug for WorkerPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<F: WorkerFactory> WorkerPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self::with_clock(factory, config, MonotonicClock::default())
    }

    /// Pool measuring idle ages with `clock`.
    pub fn with_clock<C: Clock + 'static>(factory: F, config: PoolConfig, clock: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(config.max_active())),
                factory,
                config,
                clock: Arc::new(clock),
                telemetry: Telemetry::default(),
                idle: Mutex::new(VecDeque::new()),
                disposed: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                evictor: Mutex::new(None),
            }),
        }
    }

    /// Attach a telemetry handle. Must be called before the pool is shared.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.telemetry = telemetry,
            None => tracing::warn!(target: "codebroker::pool", "telemetry ignored on a shared pool"),
        }
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Borrow a worker, awaiting a free slot when `max_active` workers are out.
    pub async fn borrow(&self) -> Result<PooledWorker<F>, PoolError> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        let permit = match Arc::clone(&shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let max_active = shared.config.max_active();
                tracing::debug!(target: "codebroker::pool", max_active, "pool exhausted, waiting");
                shared.telemetry.emit(ResolverEvent::Pool(PoolEvent::Exhausted { max_active }));
                Arc::clone(&shared.permits).acquire_owned().await.map_err(|_| PoolError::Disposed)?
            }
        };
        self.check_out(permit).await
    }

    /// Borrow a worker only if a slot is free right now. `Ok(None)` when the pool is exhausted.
    pub async fn try_borrow(&self) -> Result<Option<PooledWorker<F>>, PoolError> {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        match Arc::clone(&shared.permits).try_acquire_owned() {
            Ok(permit) => self.check_out(permit).await.map(Some),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PoolError::Disposed),
        }
    }

    async fn check_out(&self, permit: OwnedSemaphorePermit) -> Result<PooledWorker<F>, PoolError> {
        let shared = &self.shared;
        let mut worker = loop {
            let candidate = lock_unpoisoned(&shared.idle).pop_back();
            match candidate {
                Some(IdleWorker { mut worker, .. }) => {
                    if shared.factory.validate(&mut worker) {
                        break worker;
                    }
                    shared.destroy(worker, DestroyReason::Invalid);
                }
                None => break shared.create().await?,
            }
        };
        if let Err(err) = shared.factory.activate(&mut worker) {
            tracing::warn!(target: "codebroker::pool", error = %err, "worker activation failed");
            shared.destroy(worker, DestroyReason::LifecycleFailure);
            return Err(PoolError::Activate(err));
        }
        shared.active.fetch_add(1, Ordering::Relaxed);
        Ok(PooledWorker {
            shared: Arc::clone(shared),
            worker: Some(worker),
            invalidated: false,
            _permit: permit,
        })
    }

    /// Destroy idle workers past the hard idle age, and those past the soft idle age while more
    /// than `min_idle` remain. Returns the number destroyed.
    pub fn evict_idle(&self) -> usize {
        let shared = &self.shared;
        let config = &shared.config;
        let now = shared.clock.now_millis();
        let evicted: Vec<F::Worker> = {
            let mut idle = lock_unpoisoned(&shared.idle);
            let mut remaining = idle.len();
            let mut kept = VecDeque::with_capacity(remaining);
            let mut evicted = Vec::new();
            // Oldest first.
            while let Some(entry) = idle.pop_front() {
                let age = Duration::from_millis(now.saturating_sub(entry.since));
                let hard = config.idle_eviction_age().is_some_and(|max| age >= max);
                let soft = config.soft_idle_eviction_age().is_some_and(|max| age >= max)
                    && remaining > config.min_idle();
                if hard || soft {
                    remaining -= 1;
                    evicted.push(entry.worker);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
            evicted
        };
        let count = evicted.len();
        for worker in evicted {
            shared.destroy(worker, DestroyReason::Evicted);
        }
        if count > 0 {
            tracing::debug!(target: "codebroker::pool", count, "evicted idle workers");
        }
        count
    }

    /// Create idle workers until `min_idle` are available. Returns the number created.
    pub async fn ensure_min_idle(&self) -> Result<usize, PoolError> {
        let shared = &self.shared;
        let mut created = 0;
        loop {
            if shared.disposed.load(Ordering::Acquire) {
                return Err(PoolError::Disposed);
            }
            if lock_unpoisoned(&shared.idle).len() >= shared.config.min_idle() {
                return Ok(created);
            }
            let worker = shared.create().await?;
            let rejected = {
                let mut idle = lock_unpoisoned(&shared.idle);
                if shared.disposed.load(Ordering::Acquire) {
                    Some((worker, DestroyReason::Disposed))
                } else if idle.len() >= shared.config.max_idle() {
                    Some((worker, DestroyReason::ExcessIdle))
                } else {
                    idle.push_back(IdleWorker { worker, since: shared.clock.now_millis() });
                    None
                }
            };
            match rejected {
                Some((worker, reason)) => {
                    shared.destroy(worker, reason);
                    return Ok(created);
                }
                None => created += 1,
            }
        }
    }

    /// Spawn the background evictor, replacing any previous one. It runs [`evict_idle`] and
    /// [`ensure_min_idle`] every `eviction_scan_interval` and stops once the pool is dropped or
    /// disposed.
    ///
    /// [`evict_idle`]: WorkerPool::evict_idle
    /// [`ensure_min_idle`]: WorkerPool::ensure_min_idle
    pub fn start_evictor(&self) {
        if self.is_disposed() {
            return;
        }
        let pool: Weak<Shared<F>> = Arc::downgrade(&self.shared);
        let period = self.shared.config.eviction_scan_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = pool.upgrade() else { break };
                let pool = WorkerPool { shared };
                pool.evict_idle();
                if let Err(err) = pool.ensure_min_idle().await {
                    if err.is_disposed() {
                        break;
                    }
                    tracing::warn!(target: "codebroker::pool", error = %err, "min idle upkeep failed");
                }
            }
        });
        if let Some(previous) = lock_unpoisoned(&self.shared.evictor).replace(handle) {
            previous.abort();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            created: shared.created.load(Ordering::Relaxed),
            destroyed: shared.destroyed.load(Ordering::Relaxed),
            active: shared.active.load(Ordering::Relaxed),
            idle: lock_unpoisoned(&shared.idle).len(),
            max_active: shared.config.max_active(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Close the pool. Pending and future borrows fail with [`PoolError::Disposed`], idle workers
    /// are destroyed now and borrowed ones when returned. Idempotent.
    pub fn dispose(&self) {
        let shared = &self.shared;
        let idle = {
            let mut idle = lock_unpoisoned(&shared.idle);
            if shared.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *idle)
        };
        shared.permits.close();
        if let Some(evictor) = lock_unpoisoned(&shared.evictor).take() {
            evictor.abort();
        }
        let count = idle.len();
        for entry in idle {
            shared.destroy(entry.worker, DestroyReason::Disposed);
        }
        tracing::info!(target: "codebroker::pool", destroyed_idle = count, "worker pool disposed");
    }
}

/// A borrowed worker. Dereferences to the worker; dropping it returns the worker to the pool.
pub struct PooledWorker<F: WorkerFactory> {
    shared: Arc<Shared<F>>,
    worker: Option<F::Worker>,
    invalidated: bool,
    // Released after `Drop::drop` has re-idled the worker.
    _permit: OwnedSemaphorePermit,
}

impl<F: WorkerFactory> PooledWorker<F> {
    /// Mark the worker as broken; it is destroyed instead of returned.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }
}

impl<F: WorkerFactory> std::fmt::Debug for PooledWorker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorker")
            .field("held", &self.worker.is_some())
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

impl<F: WorkerFactory> Deref for PooledWorker<F> {
    type Target = F::Worker;

    fn deref(&self) -> &Self::Target {
        match &self.worker {
            Some(worker) => worker,
            None => unreachable!("worker is only taken on drop"),
        }
    }
}

impl<F: WorkerFactory> DerefMut for PooledWorker<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.worker {
            Some(worker) => worker,
            None => unreachable!("worker is only taken on drop"),
        }
    }
}

impl<F: WorkerFactory> Drop for PooledWorker<F> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.shared.give_back(worker, self.invalidated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct Counter {
        next: AtomicUsize,
        destroyed: Mutex<Vec<usize>>,
        reject: AtomicBool,
    }

    #[async_trait]
    impl WorkerFactory for Arc<Counter> {
        type Worker = usize;

        async fn create(&self) -> Result<usize, BoxError> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn validate(&self, _worker: &mut usize) -> bool {
            !self.reject.load(Ordering::SeqCst)
        }

        fn destroy(&self, worker: usize) {
            self.destroyed.lock().unwrap().push(worker);
        }
    }

    fn config(max_active: usize, min_idle: usize, max_idle: usize) -> PoolConfig {
        PoolConfig::builder()
            .max_active(max_active)
            .min_idle(min_idle)
            .max_idle(max_idle)
            .idle_eviction_age(Some(Duration::from_secs(60)))
            .soft_idle_eviction_age(Some(Duration::from_secs(10)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn returned_worker_is_reused() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(2, 0, 2));
        let first = *pool.borrow().await.unwrap();
        let second = *pool.borrow().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn try_borrow_reports_exhaustion_without_waiting() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(1, 0, 1));
        let held = pool.try_borrow().await.unwrap().unwrap();
        assert!(pool.try_borrow().await.unwrap().is_none());
        drop(held);
        assert_eq!(*pool.try_borrow().await.unwrap().unwrap(), 0);
        pool.dispose();
        assert!(pool.try_borrow().await.unwrap_err().is_disposed());
    }

    #[tokio::test]
    async fn most_recently_returned_worker_wins() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(2, 0, 2));
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        let (id_a, id_b) = (*a, *b);
        drop(a);
        drop(b);
        assert_eq!(*pool.borrow().await.unwrap(), id_b);
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn borrow_waits_for_a_free_slot() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(1, 0, 1));
        let held = pool.borrow().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
        assert!(waiting.is_err(), "second borrow must wait while the only worker is out");

        let other = pool.clone();
        let pending = tokio::spawn(async move { *other.borrow().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = *held;
        drop(held);
        assert_eq!(pending.await.unwrap(), id);
    }

    #[tokio::test]
    async fn invalid_idle_workers_are_destroyed() {
        let factory = Arc::new(Counter::default());
        let pool = WorkerPool::new(Arc::clone(&factory), config(2, 0, 2));
        drop(pool.borrow().await.unwrap());
        factory.reject.store(true, Ordering::SeqCst);
        let fresh = *pool.borrow().await.unwrap();
        assert_eq!(fresh, 1);
        assert_eq!(*factory.destroyed.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn invalidated_worker_is_not_returned() {
        let factory = Arc::new(Counter::default());
        let pool = WorkerPool::new(Arc::clone(&factory), config(2, 0, 2));
        let mut worker = pool.borrow().await.unwrap();
        worker.invalidate();
        drop(worker);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[tokio::test]
    async fn excess_idle_workers_are_destroyed() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(3, 0, 1));
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn eviction_honors_hard_and_soft_ages() {
        let clock = ManualClock::new();
        let pool =
            WorkerPool::with_clock(Arc::new(Counter::default()), config(3, 1, 3), clock.clone());
        let workers =
            vec![pool.borrow().await.unwrap(), pool.borrow().await.unwrap(), pool.borrow().await.unwrap()];
        drop(workers);
        assert_eq!(pool.stats().idle, 3);

        clock.advance(5_000);
        assert_eq!(pool.evict_idle(), 0);

        // Past the soft age: evict down to min_idle.
        clock.advance(6_000);
        assert_eq!(pool.evict_idle(), 2);
        assert_eq!(pool.stats().idle, 1);

        // Past the hard age: min_idle no longer protects it.
        clock.advance(60_000);
        assert_eq!(pool.evict_idle(), 1);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn ensure_min_idle_prefills() {
        let pool = WorkerPool::new(Arc::new(Counter::default()), config(2, 2, 2));
        assert_eq!(pool.ensure_min_idle().await.unwrap(), 2);
        assert_eq!(pool.ensure_min_idle().await.unwrap(), 0);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_fences_borrows() {
        let factory = Arc::new(Counter::default());
        let pool = WorkerPool::new(Arc::clone(&factory), config(1, 0, 1));
        drop(pool.borrow().await.unwrap());
        let held = pool.borrow().await.unwrap();

        let other = pool.clone();
        let pending = tokio::spawn(async move { other.borrow().await.map(|w| *w) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.dispose();
        pool.dispose();
        assert!(pending.await.unwrap().unwrap_err().is_disposed());
        assert!(pool.borrow().await.unwrap_err().is_disposed());

        drop(held);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(factory.destroyed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evictor_runs_periodically() {
        let clock = ManualClock::new();
        let config = PoolConfig::builder()
            .max_active(2)
            .min_idle(0)
            .max_idle(2)
            .idle_eviction_age(Some(Duration::from_secs(1)))
            .soft_idle_eviction_age(None)
            .eviction_scan_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let pool = WorkerPool::with_clock(Arc::new(Counter::default()), config, clock.clone());
        drop(pool.borrow().await.unwrap());
        pool.start_evictor();

        clock.advance(2_000);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(pool.stats().idle, 0);
        pool.dispose();
    }
}
