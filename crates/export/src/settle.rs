//! Wait-until-quiet tracking for background work.
//!
//! Each piece of background work holds a [`SettleGuard`] for its lifetime.
//! [`SettleTracker::wait`] returns once no guard is alive, including guards
//! created while waiting, so it observes work that spawns more work.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Inner {
    in_flight: Mutex<usize>,
    quiet: Condvar,
}

/// Counts outstanding background tasks.
#[derive(Clone, Debug, Default)]
pub struct SettleTracker {
    inner: Arc<Inner>,
}

impl SettleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one task. It is considered finished when the guard drops.
    pub fn track(&self) -> SettleGuard {
        *self.inner.in_flight.lock() += 1;
        SettleGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.lock()
    }

    pub fn is_quiet(&self) -> bool {
        self.in_flight() == 0
    }

    /// Block until no task is in flight.
    pub fn wait(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        while *in_flight > 0 {
            self.inner.quiet.wait(&mut in_flight);
        }
    }
}

/// Keeps its task counted as in flight until dropped.
#[derive(Debug)]
pub struct SettleGuard {
    inner: Arc<Inner>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.inner.quiet.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn quiet_when_nothing_tracked() {
        let tracker = SettleTracker::new();
        assert!(tracker.is_quiet());
        tracker.wait();
    }

    #[test]
    fn guard_drop_releases() {
        let tracker = SettleTracker::new();
        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.in_flight(), 2);
        drop(a);
        assert!(!tracker.is_quiet());
        drop(b);
        assert!(tracker.is_quiet());
    }

    #[test]
    fn wait_covers_work_spawned_by_work() {
        let tracker = SettleTracker::new();
        let outer = tracker.track();
        let spawner = tracker.clone();
        let handle = std::thread::spawn(move || {
            let inner = spawner.track();
            drop(outer);
            std::thread::sleep(Duration::from_millis(20));
            drop(inner);
        });

        tracker.wait();
        assert!(tracker.is_quiet());
        handle.join().unwrap();
    }
}
