//! Telemetry for resolvers, pools and routers.
//!
//! Every node emits [`ResolverEvent`]s through a [`Telemetry`] handle. Sinks are
//! `tower::Service<ResolverEvent>` implementations ([`TelemetrySink`]) so they compose with the
//! rest of the tower ecosystem.
//!
//! Emission is best-effort and never awaits: an event is delivered inline when the sink is ready
//! and its future completes immediately (true for every sink in this module), handed to the
//! current tokio runtime otherwise, and dropped when there is no runtime. Sink errors are ignored.

pub mod events;
pub mod sinks;

pub use events::{
    CacheEvent, DestroyReason, FallbackEvent, LifecycleEvent, PoolEvent, ResolverEvent,
    RouterEvent,
};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use crate::error::BoxError;
use crate::lock_unpoisoned;
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use tower::util::BoxCloneService;
use tower::ServiceExt;

type BoxSink = BoxCloneService<ResolverEvent, (), BoxError>;

/// Cloneable, type-erased telemetry handle. The default handle discards everything.
#[derive(Clone, Default)]
pub struct Telemetry {
    sink: Option<Arc<Mutex<BoxSink>>>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").field("enabled", &self.is_enabled()).finish()
    }
}

impl Telemetry {
    /// Handle delivering to `sink`.
    pub fn new<S>(sink: S) -> Self
    where
        S: tower::Service<ResolverEvent, Response = ()> + Clone + Send + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        let sink = BoxCloneService::new(sink.map_err(Into::<BoxError>::into));
        Self { sink: Some(Arc::new(Mutex::new(sink))) }
    }

    /// Handle discarding every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Deliver `event`, best-effort.
    pub fn emit(&self, event: ResolverEvent) {
        let Some(sink) = &self.sink else { return };
        let sink = lock_unpoisoned(sink).clone();
        let mut delivery = Box::pin(emit_best_effort(sink, event));
        if (&mut delivery).now_or_never().is_none() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(delivery);
            }
        }
    }
}

impl<S> From<S> for Telemetry
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    fn from(sink: S) -> Self {
        Self::new(sink)
    }
}
