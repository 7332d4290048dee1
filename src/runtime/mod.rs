//! The runtime context: scheduler, streams, interface registry, router, and
//! monitor, owned together and passed explicitly. There is no process-global
//! state; two runtimes in one process stay fully independent.

pub mod counter;
pub mod monitor;
pub mod sched;
pub mod stream;

use crate::net::{JoinFn, NetFn, SpawnCtx};
use crate::record::payload::InterfaceRegistry;
use crate::route::{Router, SingleNode};
use crate::runtime::monitor::{Monitor, NullMonitor};
use crate::runtime::sched::{Scheduler, SpawnHandle};
use crate::runtime::stream::{StreamRx, StreamTx};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker threads. Defaults to the number of CPUs.
    pub workers: usize,
    /// Capacity of streams the runtime opens; 0 means unbounded. Bounded
    /// streams are what give the graph backpressure.
    pub stream_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            stream_capacity: 64,
        }
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) spawner: SpawnHandle,
    pub(crate) registry: InterfaceRegistry,
    pub(crate) router: Arc<dyn Router>,
    pub(crate) monitor: Arc<dyn Monitor>,
    pub(crate) config: RuntimeConfig,
    next_stream_id: AtomicU64,
}

impl RuntimeInner {
    pub(crate) fn open_stream(&self, capacity: usize) -> (StreamTx, StreamRx) {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        stream::channel_with(capacity, id, Some(Arc::clone(&self.monitor)))
    }

    pub(crate) fn default_stream(&self) -> (StreamTx, StreamRx) {
        self.open_stream(self.config.stream_capacity)
    }
}

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registry: InterfaceRegistry,
    monitor: Arc<dyn Monitor>,
    router: Arc<dyn Router>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            registry: InterfaceRegistry::with_builtins(),
            monitor: Arc::new(NullMonitor),
            router: Arc::new(SingleNode),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.config.stream_capacity = capacity;
        self
    }

    /// Replaces the interface capability table. Start from
    /// [`InterfaceRegistry::with_builtins`] to keep the built-in ids valid.
    pub fn registry(mut self, registry: InterfaceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn build(self) -> Runtime {
        let sched = Scheduler::new(self.config.workers, Arc::clone(&self.monitor));
        let inner = Arc::new(RuntimeInner {
            spawner: sched.handle(),
            registry: self.registry,
            router: self.router,
            monitor: self.monitor,
            config: self.config,
            next_stream_id: AtomicU64::new(0),
        });
        Runtime { inner, sched }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running dataflow runtime.
///
/// Dropping it stops the workers; entities are expected to have shut down
/// by then through terminate propagation.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    sched: Scheduler,
}

impl Runtime {
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.inner.registry
    }

    /// Opens a stream at the configured default capacity.
    pub fn stream(&self) -> (StreamTx, StreamRx) {
        self.inner.default_stream()
    }

    pub fn stream_with_capacity(&self, capacity: usize) -> (StreamTx, StreamRx) {
        self.inner.open_stream(capacity)
    }

    /// Instantiates a network: opens its external input stream, wires the
    /// graph at the root location, and returns the pair the host feeds and
    /// drains. The graph runs until terminate records have swept through it.
    pub fn mount(&self, net: &NetFn) -> (StreamTx, StreamRx) {
        let (tx, rx) = self.inner.default_stream();
        let mut ctx = SpawnCtx::root(Arc::clone(&self.inner));
        let out = net(&mut ctx, rx);
        (tx, out)
    }

    /// Like [`Runtime::mount`] for a two-input network, returning both
    /// feeds.
    pub fn mount_join(&self, net: &JoinFn) -> (StreamTx, StreamTx, StreamRx) {
        let (main_tx, main_rx) = self.inner.default_stream();
        let (aux_tx, aux_rx) = self.inner.default_stream();
        let mut ctx = SpawnCtx::root(Arc::clone(&self.inner));
        let out = net(&mut ctx, main_rx, aux_rx);
        (main_tx, aux_tx, out)
    }

    /// Tasks spawned and not yet finished.
    pub fn live_tasks(&self) -> usize {
        self.sched.live_tasks()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
