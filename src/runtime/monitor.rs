use crate::runtime::sched::{EntityKind, TaskId};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Spawned { task: TaskId, kind: EntityKind },
    Blocked { task: TaskId },
    Resumed { task: TaskId },
    Exited { task: TaskId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Created { stream: u64 },
    Wrote { stream: u64 },
    Read { stream: u64 },
}

/// Observation hooks for task lifecycle and stream traffic.
///
/// Events fire unconditionally on the hot path, so implementations must be
/// cheap and must never block; whether anyone is listening cannot change
/// scheduling behavior.
pub trait Monitor: Send + Sync {
    fn task(&self, event: TaskEvent) {
        let _ = event;
    }

    fn stream(&self, event: StreamEvent) {
        let _ = event;
    }
}

/// Discards everything. The default.
pub struct NullMonitor;

impl Monitor for NullMonitor {}

/// Logs every event at trace level.
pub struct TraceMonitor;

impl Monitor for TraceMonitor {
    fn task(&self, event: TaskEvent) {
        tracing::trace!(?event, "task");
    }

    fn stream(&self, event: StreamEvent) {
        tracing::trace!(?event, "stream");
    }
}

/// Counts events. Scheduler and stream tests assert against it.
#[derive(Default)]
pub struct CountingMonitor {
    spawned: AtomicUsize,
    blocked: AtomicUsize,
    resumed: AtomicUsize,
    exited: AtomicUsize,
    wrote: AtomicUsize,
    read: AtomicUsize,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn resumed(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn wrote(&self) -> usize {
        self.wrote.load(Ordering::SeqCst)
    }

    pub fn read(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }
}

impl Monitor for CountingMonitor {
    fn task(&self, event: TaskEvent) {
        let counter = match event {
            TaskEvent::Spawned { .. } => &self.spawned,
            TaskEvent::Blocked { .. } => &self.blocked,
            TaskEvent::Resumed { .. } => &self.resumed,
            TaskEvent::Exited { .. } => &self.exited,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn stream(&self, event: StreamEvent) {
        let counter = match event {
            StreamEvent::Created { .. } => return,
            StreamEvent::Wrote { .. } => &self.wrote,
            StreamEvent::Read { .. } => &self.read,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}
