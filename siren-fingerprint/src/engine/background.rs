//! Outstanding background job tracking

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Counts fire-and-forget jobs from submission until they finish (or are dropped).
#[derive(Default)]
pub struct BackgroundTracker {
    pending: Mutex<usize>,
    drained: Condvar,
}

impl BackgroundTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a job. The job is done when the returned guard is dropped.
    pub fn start(self: &Arc<Self>) -> BackgroundGuard {
        *self.pending.lock().unwrap() += 1;
        BackgroundGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.lock().unwrap()
    }

    /// Block until every registered job has finished.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.drained.wait(pending).unwrap();
        }
    }

    /// Like [`BackgroundTracker::wait`] with an upper bound. Returns whether all jobs finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap();
        let (pending, _) = self
            .drained
            .wait_timeout_while(pending, timeout, |p| *p > 0)
            .unwrap();
        *pending == 0
    }

    fn finish(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }
}

pub struct BackgroundGuard {
    tracker: Arc<BackgroundTracker>,
}

impl Drop for BackgroundGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_blocks_until_guards_drop() {
        let tracker = BackgroundTracker::new();
        let guard = tracker.start();
        assert_eq!(tracker.pending(), 1);
        assert!(!tracker.wait_timeout(Duration::from_millis(10)));

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        tracker.wait();
        assert_eq!(tracker.pending(), 0);
        worker.join().unwrap();
    }
}
