use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A shareable, linearizable counter.
///
/// Handles clone cheaply and all point at the same value. The
/// fetch-and-modify pair is the shared-ownership protocol used across tasks:
/// the holder that sees [`fetch_dec`](Self::fetch_dec) return 1 is the last
/// one out and does the freeing.
#[derive(Debug, Clone, Default)]
pub struct AtomicCounter {
    value: Arc<AtomicI64>,
}

impl AtomicCounter {
    pub fn new(initial: i64) -> Self {
        Self {
            value: Arc::new(AtomicI64::new(initial)),
        }
    }

    /// Adds one, returning the previous value.
    pub fn fetch_inc(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Subtracts one, returning the previous value.
    pub fn fetch_dec(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_returns_previous() {
        let counter = AtomicCounter::new(5);
        assert_eq!(counter.fetch_inc(), 5);
        assert_eq!(counter.fetch_dec(), 6);
        assert_eq!(counter.get(), 5);
        counter.set(-2);
        assert_eq!(counter.get(), -2);
    }

    #[test]
    fn shared_across_threads() {
        let counter = AtomicCounter::new(0);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.fetch_inc();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 4000);
    }

    #[test]
    fn last_one_out() {
        let counter = AtomicCounter::new(3);
        assert_ne!(counter.fetch_dec(), 1);
        assert_ne!(counter.fetch_dec(), 1);
        // Whoever sees 1 held the last reference.
        assert_eq!(counter.fetch_dec(), 1);
    }
}
