use super::PoolShared;
use crate::runtime::monitor::TaskEvent;
use crate::runtime::sched::EntityKind;
use futures::task::ArcWake;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

/// Identity of a spawned task. Never reused within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

// Task states, kept in one atomic so wakers transition without locking.
// NOTIFIED refines RUNNING: a wake arrived mid-poll and the task must be
// requeued as soon as its poll returns.
const READY: u8 = 0;
const RUNNING: u8 = 1;
const BLOCKED: u8 = 2;
const NOTIFIED: u8 = 3;
const ZOMBIE: u8 = 4;

pub(super) struct Task {
    pub(super) id: TaskId,
    pub(super) kind: EntityKind,
    state: AtomicU8,
    future: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    pool: Weak<PoolShared>,
}

impl Task {
    pub(super) fn new(
        id: TaskId,
        kind: EntityKind,
        future: Pin<Box<dyn Future<Output = ()> + Send>>,
        pool: &Arc<PoolShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            state: AtomicU8::new(READY),
            future: Mutex::new(Some(future)),
            pool: Arc::downgrade(pool),
        })
    }

    /// Polls the task once on the calling worker. Returns true when the
    /// task finished and became a zombie.
    pub(super) fn run(self: &Arc<Self>) -> bool {
        self.state.store(RUNNING, Ordering::SeqCst);
        let waker = futures::task::waker(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock().unwrap();
        let Some(future) = slot.as_mut() else {
            return true;
        };
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                self.state.store(ZOMBIE, Ordering::SeqCst);
                true
            }
            Poll::Pending => {
                drop(slot);
                match self.state.compare_exchange(
                    RUNNING,
                    BLOCKED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        if let Some(pool) = self.pool.upgrade() {
                            pool.monitor.task(TaskEvent::Blocked { task: self.id });
                        }
                    }
                    Err(_) => {
                        // Woken mid-poll; it goes straight back in line.
                        self.state.store(READY, Ordering::SeqCst);
                        if let Some(pool) = self.pool.upgrade() {
                            pool.enqueue(Arc::clone(self));
                        }
                    }
                }
                false
            }
        }
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut current = arc_self.state.load(Ordering::SeqCst);
        loop {
            match current {
                BLOCKED => {
                    match arc_self.state.compare_exchange(
                        BLOCKED,
                        READY,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => {
                            if let Some(pool) = arc_self.pool.upgrade() {
                                pool.monitor.task(TaskEvent::Resumed { task: arc_self.id });
                                pool.enqueue(Arc::clone(arc_self));
                            }
                            return;
                        }
                        Err(actual) => current = actual,
                    }
                }
                RUNNING => {
                    match arc_self.state.compare_exchange(
                        RUNNING,
                        NOTIFIED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return,
                        Err(actual) => current = actual,
                    }
                }
                // Already queued, already notified, or already finished.
                _ => return,
            }
        }
    }
}

/// Reschedules the calling task once, letting every other ready task run
/// first. The only suspension point besides the stream operations.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
