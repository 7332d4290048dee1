#[cfg(test)]
mod tests {
    use crate::record::Record;
    use crate::runtime::counter::AtomicCounter;
    use crate::runtime::monitor::{CountingMonitor, NullMonitor};
    use crate::runtime::sched::{yield_now, EntityKind, Scheduler};
    use crate::runtime::stream::channel;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(5) {
                panic!("timed out waiting for {}", what);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn completes_spawned_tasks() {
        let sched = Scheduler::new(4, Arc::new(NullMonitor));
        let counter = AtomicCounter::new(0);
        for _ in 0..100 {
            let counter = counter.clone();
            sched.spawn(EntityKind::Box, async move {
                counter.fetch_inc();
            });
        }
        wait_until("all tasks to run", || counter.get() == 100);
        wait_until("live count to drain", || sched.live_tasks() == 0);
    }

    #[test]
    fn tasks_suspend_at_stream_bounds() {
        let sched = Scheduler::new(2, Arc::new(NullMonitor));
        let (mut tx, mut rx) = channel(1);
        let seen = AtomicCounter::new(0);
        let done = AtomicCounter::new(0);

        sched.spawn(EntityKind::Box, async move {
            for _ in 0..50 {
                if tx.write(Record::Probe).await.is_err() {
                    return;
                }
            }
        });
        let seen_in_task = seen.clone();
        let done_in_task = done.clone();
        sched.spawn(EntityKind::Box, async move {
            while rx.read().await.is_some() {
                seen_in_task.fetch_inc();
            }
            done_in_task.fetch_inc();
        });

        wait_until("consumer to finish", || done.get() == 1);
        assert_eq!(seen.get(), 50);
    }

    #[test]
    fn many_more_tasks_than_workers() {
        let sched = Scheduler::new(2, Arc::new(NullMonitor));
        let counter = AtomicCounter::new(0);
        for _ in 0..100 {
            let counter = counter.clone();
            sched.spawn(EntityKind::Filter, async move {
                for _ in 0..10 {
                    yield_now().await;
                }
                counter.fetch_inc();
            });
        }
        wait_until("yielding tasks to finish", || counter.get() == 100);
    }

    #[test]
    fn spawning_from_inside_a_task() {
        let sched = Scheduler::new(2, Arc::new(NullMonitor));
        let handle = sched.handle();
        let counter = AtomicCounter::new(0);
        let counter_outer = counter.clone();
        sched.spawn(EntityKind::Star, async move {
            let counter_inner = counter_outer.clone();
            handle.spawn(EntityKind::Star, async move {
                counter_inner.fetch_inc();
            });
            counter_outer.fetch_inc();
        });
        wait_until("parent and child to run", || counter.get() == 2);
    }

    #[test]
    fn monitor_observes_lifecycle() {
        let monitor = Arc::new(CountingMonitor::new());
        let sched = Scheduler::new(2, monitor.clone());
        let (mut tx, mut rx) = channel(1);
        let done = AtomicCounter::new(0);

        sched.spawn(EntityKind::Box, async move {
            for _ in 0..3 {
                if tx.write(Record::Probe).await.is_err() {
                    return;
                }
            }
        });
        // Let the producer hit the capacity bound before the consumer exists.
        std::thread::sleep(Duration::from_millis(50));
        let done_in_task = done.clone();
        sched.spawn(EntityKind::Box, async move {
            while rx.read().await.is_some() {}
            done_in_task.fetch_inc();
        });

        wait_until("consumer to finish", || done.get() == 1);
        wait_until("tasks to exit", || sched.live_tasks() == 0);
        sched.shutdown();

        assert_eq!(monitor.spawned(), 2);
        assert_eq!(monitor.exited(), 2);
        assert!(monitor.blocked() >= 1);
        assert!(monitor.resumed() >= 1);
    }

    #[test]
    fn shutdown_returns_with_no_tasks() {
        let sched = Scheduler::new(4, Arc::new(NullMonitor));
        sched.shutdown();
    }
}
