//! Least-busy queue selection

use super::task::Callback;
use crate::common::SafeQueue;
use std::sync::{Arc, RwLock};

pub type TaskQueue = Arc<SafeQueue<Callback>>;

/// Owns the per-worker queues.
///
/// Workers receive their queue handle at spawn time and only ever pop from
/// it. New work goes to the queue with the smallest (size, id).
pub struct QueueDispatch {
    queues: RwLock<Vec<TaskQueue>>,
}

impl QueueDispatch {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(Vec::new()),
        }
    }

    /// Create and register a new queue, returning the handle for its workers.
    pub fn add_queue(&self) -> TaskQueue {
        let queue = Arc::new(SafeQueue::new());
        self.queues.write().unwrap().push(Arc::clone(&queue));
        queue
    }

    pub fn least_busy(&self) -> Option<TaskQueue> {
        self.queues
            .read()
            .unwrap()
            .iter()
            .min_by_key(|q| (q.size(), q.id()))
            .cloned()
    }

    /// Push onto the least-busy queue. Returns the id of the chosen queue, or
    /// hands the callback back when no queue accepts work.
    pub fn push(&self, callback: Callback) -> Result<usize, Callback> {
        match self.least_busy() {
            Some(queue) if !queue.is_aborted() => {
                queue.push(callback);
                Ok(queue.id())
            }
            _ => Err(callback),
        }
    }

    pub fn queue_count(&self) -> usize {
        self.queues.read().unwrap().len()
    }

    /// Sum of the approximate queue sizes.
    pub fn pending(&self) -> usize {
        self.queues.read().unwrap().iter().map(|q| q.size()).sum()
    }

    pub fn abort_all(&self) {
        for queue in self.queues.read().unwrap().iter() {
            queue.signal_abort();
        }
    }

    /// Drop every buffered callback. Returns how many were discarded.
    pub fn discard_all(&self) -> usize {
        self.queues
            .read()
            .unwrap()
            .iter()
            .map(|q| q.discard())
            .sum()
    }
}

impl Default for QueueDispatch {
    fn default() -> Self {
        Self::new()
    }
}
