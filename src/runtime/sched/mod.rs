//! The cooperative task scheduler: many entities, few worker threads.
//!
//! Every network entity runs as a lightweight task on a fixed pool of
//! workers. Tasks suspend only inside stream operations (and the explicit
//! [`yield_now`]), so a worker runs each task until it genuinely has to
//! wait, then picks the next ready one. Wakes go through the task's own
//! waker, which moves it back into the shared ready queue.
//!
//! The pool is work-sharing, not work-stealing: one injector queue feeds
//! all workers, which makes every ready task visible to every idle worker.
//! Idle workers park; a push wakes one of them, and the park has a timeout
//! so a racy push can delay a task but never strand it.
//!
//! There is no preemption and no forced termination. Entities shut down by
//! observing terminate records and returning; a task that never observes
//! one stays parked until the process exits.

mod task;
mod tests;

pub use task::{yield_now, TaskId, YieldNow};

use crate::runtime::monitor::{Monitor, TaskEvent};
use crossbeam_queue::SegQueue;
use crossbeam_utils::sync::Parker;
use crossbeam_utils::sync::Unparker;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use task::Task;

/// What an entity is. Drives monitoring labels, location paths, and stack
/// budgeting at spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Box,
    Serial,
    Parallel,
    Star,
    Split,
    Sync,
    Filter,
    Collect,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Box => "box",
            Self::Serial => "serial",
            Self::Parallel => "parallel",
            Self::Star => "star",
            Self::Split => "split",
            Self::Sync => "sync",
            Self::Filter => "filter",
            Self::Collect => "collect",
        })
    }
}

/// Stack budget (red zone, reserve) for entities of this kind, if they need
/// one. Box entities call arbitrary user code, possibly deeply recursive;
/// the pure control entities stay on the worker's stack.
pub fn stack_budget(kind: EntityKind) -> Option<(usize, usize)> {
    match kind {
        EntityKind::Box => Some((32 * 1024, 4 * 1024 * 1024)),
        _ => None,
    }
}

pub(crate) struct PoolShared {
    queue: SegQueue<Arc<Task>>,
    idle: SegQueue<usize>,
    unparkers: Vec<Unparker>,
    live: AtomicUsize,
    next_task_id: AtomicU64,
    shutdown: AtomicBool,
    pub(crate) monitor: Arc<dyn Monitor>,
}

impl PoolShared {
    fn enqueue(&self, task: Arc<Task>) {
        self.queue.push(task);
        if let Some(index) = self.idle.pop() {
            self.unparkers[index].unpark();
        }
    }
}

/// A cheap handle that can spawn tasks onto the pool from anywhere,
/// including from inside running tasks.
#[derive(Clone)]
pub struct SpawnHandle {
    shared: Arc<PoolShared>,
}

impl SpawnHandle {
    pub fn spawn(
        &self,
        kind: EntityKind,
        future: impl Future<Output = ()> + Send + 'static,
    ) -> TaskId {
        let id = TaskId(self.shared.next_task_id.fetch_add(1, Ordering::SeqCst));
        let task = Task::new(id, kind, Box::pin(future), &self.shared);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.shared.monitor.task(TaskEvent::Spawned { task: id, kind });
        tracing::trace!(task = id.0, %kind, "spawn");
        self.shared.enqueue(task);
        id
    }

    /// Tasks spawned and not yet finished.
    pub fn live_tasks(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(workers: usize, monitor: Arc<dyn Monitor>) -> Self {
        let workers = workers.max(1);
        let parkers: Vec<Parker> = (0..workers).map(|_| Parker::new()).collect();
        let shared = Arc::new(PoolShared {
            queue: SegQueue::new(),
            idle: SegQueue::new(),
            unparkers: parkers.iter().map(|p| p.unparker().clone()).collect(),
            live: AtomicUsize::new(0),
            next_task_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            monitor,
        });
        let workers = parkers
            .into_iter()
            .enumerate()
            .map(|(index, parker)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("weir-worker-{index}"))
                    .spawn(move || worker_loop(index, parker, shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { shared, workers }
    }

    pub fn handle(&self) -> SpawnHandle {
        SpawnHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn spawn(
        &self,
        kind: EntityKind,
        future: impl Future<Output = ()> + Send + 'static,
    ) -> TaskId {
        self.handle().spawn(kind, future)
    }

    pub fn live_tasks(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Stops the workers and joins them. Queued tasks are dropped; live
    /// entities are expected to have terminated already.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for unparker in &self.shared.unparkers {
            unparker.unpark();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(index: usize, parker: Parker, shared: Arc<PoolShared>) {
    loop {
        if let Some(task) = shared.queue.pop() {
            let id = task.id;
            let kind = task.kind;
            if task.run() {
                shared.live.fetch_sub(1, Ordering::SeqCst);
                shared.monitor.task(TaskEvent::Exited { task: id });
                tracing::trace!(task = id.0, %kind, "exit");
            }
            continue;
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        shared.idle.push(index);
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
            // Stale idle entries make spurious unparks, and a racy push can
            // miss this worker entirely; the timeout covers the gap.
            parker.park_timeout(Duration::from_millis(50));
        }
    }
}
