//! Blocking FIFO with an abort signal

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

/// Thread-safe blocking queue.
///
/// Once aborted, every blocked and future `pop` returns `None` immediately.
/// Items still buffered at abort time are left for the owner to `discard`.
pub struct SafeQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
    size: AtomicUsize,
    aborted: AtomicBool,
    id: usize,
}

impl<T> SafeQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            size: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Append an item and wake one waiter.
    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap();
            items.push_back(item);
            self.size.fetch_add(1, Ordering::SeqCst);
        }
        self.available.notify_one();
    }

    /// Block until an item is available or the queue is aborted.
    pub fn pop(&self) -> Option<T> {
        let mut items = self.items.lock().unwrap();
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(item) = items.pop_front() {
                self.size.fetch_sub(1, Ordering::SeqCst);
                return Some(item);
            }
            items = self.available.wait(items).unwrap();
        }
    }

    /// Non-blocking pop. Returns `None` when empty or aborted.
    pub fn try_pop(&self) -> Option<T> {
        if self.aborted.load(Ordering::SeqCst) {
            return None;
        }
        let mut items = self.items.lock().unwrap();
        let item = items.pop_front();
        if item.is_some() {
            self.size.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Permanently wake all waiters. Idempotent.
    pub fn signal_abort(&self) {
        {
            let _items = self.items.lock().unwrap();
            self.aborted.store(true, Ordering::SeqCst);
        }
        self.available.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Drop every buffered item, returning how many were discarded.
    pub fn discard(&self) -> usize {
        let mut items = self.items.lock().unwrap();
        let count = items.len();
        items.clear();
        self.size.store(0, Ordering::SeqCst);
        count
    }

    /// Approximate number of buffered items.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
