//! Worker pool behavior under load, pause and nesting

use serial_test::serial;
use siren_fingerprint::config::ThreadPoolConfig;
use siren_fingerprint::thread_pool::{AsyncManager, ThreadPool, WorkSubmitter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

#[test]
fn test_all_submitted_tasks_complete() {
    let pool = ThreadPool::new(3, 2, true);
    let completed = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..100)
        .map(|i| {
            let completed = Arc::clone(&completed);
            pool.submit_task(
                move || {
                    completed.fetch_add(1, Ordering::SeqCst);
                    i * 2
                },
                true,
            )
        })
        .collect();

    let results: Vec<usize> = futures.into_iter().filter_map(|f| f.join()).collect();
    assert_eq!(results.len(), 100);
    assert_eq!(results.iter().sum::<usize>(), (0..100).map(|i| i * 2).sum::<usize>());
    assert_eq!(completed.load(Ordering::SeqCst), 100);

    pool.wait_for_all();
    assert_eq!(pool.queued_jobs(), 0);
    assert_eq!(pool.running_jobs(), 0);
}

#[test]
fn test_pause_holds_new_tasks_until_resume() {
    let pool = ThreadPool::new(2, 1, true);
    pool.pause();
    assert!(pool.is_paused());

    let started = Arc::new(AtomicBool::new(false));
    let future = {
        let started = Arc::clone(&started);
        pool.submit_task(move || started.store(true, Ordering::SeqCst), true)
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(pool.running_jobs(), 0);

    pool.resume();
    assert_eq!(future.join(), Some(()));
    assert!(started.load(Ordering::SeqCst));
}

#[test]
fn test_pause_does_not_stop_running_task() {
    let pool = ThreadPool::new(1, 1, true);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();

    let future = pool.submit_task(
        move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            "done"
        },
        true,
    );

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    pool.pause();
    release_tx.send(()).unwrap();
    assert_eq!(future.join(), Some("done"));
    pool.resume();
}

#[test]
fn test_nested_submit_from_worker_does_not_deadlock() {
    let pool = Arc::new(ThreadPool::new(1, 1, true));
    let submitter = WorkSubmitter::new(Arc::clone(&pool));

    let inner_submitter = submitter.clone();
    let outer = submitter.submit_task(
        move || {
            let inner = inner_submitter.submit_task(|| 21 * 2, true);
            inner.join()
        },
        true,
    );

    assert_eq!(outer.join(), Some(Some(42)));
}

#[test]
fn test_fire_and_forget_tasks_finish_before_graceful_shutdown() {
    let pool = ThreadPool::new(2, 2, true);
    let completed = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let completed = Arc::clone(&completed);
        drop(pool.submit_task(
            move || {
                thread::sleep(Duration::from_millis(2));
                completed.fetch_add(1, Ordering::SeqCst);
            },
            false,
        ));
    }

    pool.shutdown();
    assert_eq!(completed.load(Ordering::SeqCst), 20);
}

#[test]
#[serial]
fn test_async_manager_shares_one_pool() {
    AsyncManager::shutdown();
    AsyncManager::init(ThreadPoolConfig {
        queues: 2,
        threads_per_queue: 1,
        graceful: true,
    });

    let first = AsyncManager::instance();
    let second = AsyncManager::instance();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.queue_count(), 2);
    assert_eq!(first.worker_count(), 2);

    let answer = AsyncManager::submitter().submit_task(|| 7, true).join();
    assert_eq!(answer, Some(7));

    AsyncManager::shutdown();
    assert!(!AsyncManager::is_running());
}
