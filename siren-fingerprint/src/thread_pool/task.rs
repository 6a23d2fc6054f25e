//! Packaged units of work and their completion handles

use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, ThreadId};

/// Type-erased, zero-argument unit of work tagged with the submitting thread.
///
/// Move-only: a callback runs at most once.
pub struct Callback {
    job: Box<dyn FnOnce() + Send + 'static>,
    sender: ThreadId,
}

impl Callback {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            job: Box::new(job),
            sender: thread::current().id(),
        }
    }

    /// Thread that packaged this callback.
    pub fn sender(&self) -> ThreadId {
        self.sender
    }

    pub fn call(self) {
        (self.job)()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Result handle for a submitted task.
///
/// With `wait = true` dropping the handle blocks until the task has finished
/// (or was discarded). With `wait = false` the task is fire-and-forget.
pub struct WaitableFuture<R> {
    receiver: Option<Receiver<R>>,
    wait: bool,
}

impl<R> WaitableFuture<R> {
    fn new(receiver: Receiver<R>, wait: bool) -> Self {
        Self {
            receiver: Some(receiver),
            wait,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.wait
    }

    /// Block until the task completes.
    ///
    /// Returns `None` if the task never produced a value (discarded at
    /// shutdown, or it panicked).
    pub fn join(mut self) -> Option<R> {
        self.receiver.take().and_then(|rx| rx.recv().ok())
    }
}

impl<R> Drop for WaitableFuture<R> {
    fn drop(&mut self) {
        if !self.wait {
            return;
        }
        if let Some(rx) = self.receiver.take() {
            let _ = rx.recv();
        }
    }
}

impl<R> fmt::Debug for WaitableFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitableFuture")
            .field("wait", &self.wait)
            .field("pending", &self.receiver.is_some())
            .finish()
    }
}

/// Wrap `job` into a callback plus the handle observing its result.
pub fn package<F, R>(job: F, wait: bool) -> (Callback, WaitableFuture<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let callback = Callback::new(move || {
        let _ = tx.send(job());
    });
    (callback, WaitableFuture::new(rx, wait))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_delivers_result() {
        let (callback, future) = package(|| 6 * 7, true);
        assert_eq!(callback.sender(), thread::current().id());
        callback.call();
        assert_eq!(future.join(), Some(42));
    }

    #[test]
    fn test_dropped_callback_releases_waiter() {
        let (callback, future) = package(|| 1u8, true);
        drop(callback);
        assert_eq!(future.join(), None);
    }

    #[test]
    fn test_waiting_drop_blocks_until_done() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let (callback, future) = package(
            move || {
                thread::sleep(Duration::from_millis(50));
                flag.store(true, Ordering::SeqCst);
            },
            true,
        );
        let worker = thread::spawn(move || callback.call());
        drop(future);
        assert!(done.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
