//! Multi-queue worker pool

use super::dispatch::{QueueDispatch, TaskQueue};
use super::task::{self, Callback, WaitableFuture};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the pool owning the current thread (0 = not a pool worker).
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct JobCounters {
    queued: usize,
    running: usize,
}

/// Shared state between the pool handle and its workers
struct PoolShared {
    id: usize,
    dispatch: QueueDispatch,

    /// Pause flag, guarded so workers can sleep on `resume_cond`
    paused: Mutex<bool>,
    resume_cond: Condvar,

    shutdown: AtomicBool,

    counters: Mutex<JobCounters>,
    idle_cond: Condvar,
}

impl PoolShared {
    /// Block while paused. Returns false once shutdown has been flagged.
    fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.lock().unwrap();
        while *paused && !self.shutdown.load(Ordering::SeqCst) {
            paused = self.resume_cond.wait(paused).unwrap();
        }
        !self.shutdown.load(Ordering::SeqCst)
    }

    fn job_enqueued(&self) {
        self.counters.lock().unwrap().queued += 1;
    }

    fn jobs_dropped(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut counters = self.counters.lock().unwrap();
        counters.queued = counters.queued.saturating_sub(count);
        if counters.queued == 0 && counters.running == 0 {
            self.idle_cond.notify_all();
        }
    }

    fn job_started(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.queued = counters.queued.saturating_sub(1);
        counters.running += 1;
    }

    fn job_finished(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.running = counters.running.saturating_sub(1);
        if counters.queued == 0 && counters.running == 0 {
            self.idle_cond.notify_all();
        }
    }
}

/// Worker pool with `queue_count` queues and `threads_per_queue` workers bound to each.
///
/// Each worker pops only from its own queue. Submissions go to the least-busy queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    graceful: bool,
    stopped: AtomicBool,
}

impl ThreadPool {
    /// Create the pool and start its workers.
    ///
    /// Zero counts are raised to one.
    pub fn new(queue_count: usize, threads_per_queue: usize, graceful: bool) -> Self {
        let queue_count = queue_count.max(1);
        let threads_per_queue = threads_per_queue.max(1);

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            dispatch: QueueDispatch::new(),
            paused: Mutex::new(false),
            resume_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            counters: Mutex::new(JobCounters::default()),
            idle_cond: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(queue_count * threads_per_queue);
        for queue_index in 0..queue_count {
            let queue = shared.dispatch.add_queue();
            for thread_index in 0..threads_per_queue {
                let worker_id = queue_index * threads_per_queue + thread_index;
                let shared_clone = Arc::clone(&shared);
                let queue_clone = Arc::clone(&queue);

                let spawned = thread::Builder::new()
                    .name(format!("siren-pool-{}-{}", shared.id, worker_id))
                    .spawn(move || Self::worker_loop(worker_id, queue_clone, shared_clone));

                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => error!("Failed to spawn pool worker {}: {}", worker_id, e),
                }
            }
        }

        info!(
            pool_id = shared.id,
            queues = queue_count,
            threads_per_queue,
            "Thread pool started with {} workers",
            workers.len()
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            graceful,
            stopped: AtomicBool::new(false),
        }
    }

    /// Worker thread main loop
    fn worker_loop(worker_id: usize, queue: TaskQueue, shared: Arc<PoolShared>) {
        CURRENT_POOL.with(|current| current.set(shared.id));
        debug!("Pool worker {} started on queue {}", worker_id, queue.id());

        loop {
            if !shared.wait_while_paused() {
                break;
            }

            let Some(callback) = queue.pop() else {
                break;
            };

            // A pause issued while we were blocked in pop() still holds back this task
            if !shared.wait_while_paused() {
                shared.jobs_dropped(1);
                break;
            }

            shared.job_started();
            if panic::catch_unwind(AssertUnwindSafe(|| callback.call())).is_err() {
                error!("Pool worker {} task panicked", worker_id);
            }
            shared.job_finished();
        }

        debug!("Pool worker {} exiting", worker_id);
    }

    /// Submit work to the pool.
    ///
    /// Called from one of this pool's own workers, the task runs at once on a
    /// detached thread instead of being queued, so nested submissions never wait
    /// on their own queue.
    pub fn submit_task<F, R>(&self, job: F, wait: bool) -> WaitableFuture<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (callback, future) = task::package(job, wait);

        if self.is_worker_thread() {
            Self::run_detached(callback);
            return future;
        }

        if self.shared.shutdown.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            warn!(pool_id = self.shared.id, "Task rejected: pool is shutting down");
            return future;
        }

        self.shared.job_enqueued();
        if let Err(rejected) = self.shared.dispatch.push(callback) {
            warn!(pool_id = self.shared.id, "Task rejected: no queue accepts work");
            drop(rejected);
            self.shared.jobs_dropped(1);
        }
        future
    }

    fn run_detached(callback: Callback) {
        let spawned = thread::Builder::new()
            .name("siren-pool-nested".to_string())
            .spawn(move || callback.call());
        if let Err(e) = spawned {
            error!("Failed to spawn nested task thread: {}", e);
        }
    }

    /// True when the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.with(|current| current.get()) == self.shared.id
    }

    /// Stop workers from starting new tasks. Running tasks are unaffected.
    pub fn pause(&self) {
        *self.shared.paused.lock().unwrap() = true;
        debug!(pool_id = self.shared.id, "Thread pool paused");
    }

    pub fn resume(&self) {
        *self.shared.paused.lock().unwrap() = false;
        self.shared.resume_cond.notify_all();
        debug!(pool_id = self.shared.id, "Thread pool resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock().unwrap()
    }

    /// Block until no task is queued or running.
    pub fn wait_for_all(&self) {
        let mut counters = self.shared.counters.lock().unwrap();
        while counters.queued > 0 || counters.running > 0 {
            counters = self.shared.idle_cond.wait(counters).unwrap();
        }
    }

    pub fn queued_jobs(&self) -> usize {
        self.shared.counters.lock().unwrap().queued
    }

    pub fn running_jobs(&self) -> usize {
        self.shared.counters.lock().unwrap().running
    }

    pub fn queue_count(&self) -> usize {
        self.shared.dispatch.queue_count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Stop the pool. Idempotent.
    ///
    /// A graceful pool first resumes and drains every queued and running task.
    /// Otherwise buffered tasks are discarded.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let on_worker = self.is_worker_thread();
        if self.graceful {
            self.resume();
            if on_worker {
                warn!(pool_id = self.shared.id, "Shutdown requested from a pool worker; skipping drain");
            } else {
                self.wait_for_all();
            }
        }

        {
            let _paused = self.shared.paused.lock().unwrap();
            self.shared.shutdown.store(true, Ordering::SeqCst);
        }
        self.shared.resume_cond.notify_all();

        self.shared.dispatch.abort_all();
        let discarded = self.shared.dispatch.discard_all();
        if discarded > 0 {
            warn!(pool_id = self.shared.id, "Discarded {} queued tasks at shutdown", discarded);
            self.shared.jobs_dropped(discarded);
        }

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool_id = self.shared.id, "Pool worker terminated abnormally");
            }
        }

        info!(pool_id = self.shared.id, "Thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable submission handle passed to components that schedule work.
#[derive(Clone)]
pub struct WorkSubmitter {
    pool: Arc<ThreadPool>,
}

impl WorkSubmitter {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self { pool }
    }

    pub fn submit_task<F, R>(&self, job: F, wait: bool) -> WaitableFuture<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.pool.submit_task(job, wait)
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

impl From<Arc<ThreadPool>> for WorkSubmitter {
    fn from(pool: Arc<ThreadPool>) -> Self {
        Self::new(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_creation() {
        let pool = ThreadPool::new(2, 3, true);
        assert_eq!(pool.queue_count(), 2);
        assert_eq!(pool.worker_count(), 6);
        assert!(!pool.is_worker_thread());
    }

    #[test]
    fn test_zero_counts_raised() {
        let pool = ThreadPool::new(0, 0, false);
        assert_eq!(pool.queue_count(), 1);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn test_submit_returns_result() {
        let pool = ThreadPool::new(1, 1, true);
        let future = pool.submit_task(|| "done", true);
        assert_eq!(future.join(), Some("done"));
    }

    #[test]
    fn test_task_runs_on_worker() {
        let pool = Arc::new(ThreadPool::new(1, 1, true));
        let inner = Arc::clone(&pool);
        let future = pool.submit_task(move || inner.is_worker_thread(), true);
        assert_eq!(future.join(), Some(true));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1, 1, true);
        let failed = pool.submit_task(|| -> u32 { panic!("boom") }, true);
        assert_eq!(failed.join(), None);

        let ok = pool.submit_task(|| 5u32, true);
        assert_eq!(ok.join(), Some(5));
        pool.wait_for_all();
        assert_eq!(pool.running_jobs(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_work() {
        let pool = ThreadPool::new(2, 1, true);
        pool.shutdown();
        pool.shutdown();

        let future = pool.submit_task(|| 1, true);
        assert_eq!(future.join(), None);
    }

    #[test]
    fn test_immediate_shutdown_discards_queued_tasks() {
        let pool = ThreadPool::new(1, 1, false);
        pool.pause();
        thread::sleep(Duration::from_millis(20));

        let futures: Vec<_> = (0..5).map(|i| pool.submit_task(move || i, false)).collect();
        pool.shutdown();

        let completed = futures.into_iter().filter_map(|f| f.join()).count();
        assert!(completed <= 1);
        assert_eq!(pool.queued_jobs(), 0);
    }
}
