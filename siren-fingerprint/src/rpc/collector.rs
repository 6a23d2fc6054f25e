//! Registry that owns every live call state

use super::call_data::{CallData, CallDataBase, RpcHandler};
use super::completion_queue::CompletionQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Call states are owned here and referenced weakly by queue events.
#[derive(Default)]
pub struct Collector {
    registry: Mutex<HashMap<usize, Arc<dyn CallDataBase>>>,
    registered: AtomicUsize,
    removed: AtomicUsize,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh call state for `H` on `queue` and arm its receive.
    pub fn create_call_data<H: RpcHandler>(self: &Arc<Self>, queue: &Arc<CompletionQueue>, context: &Arc<H::Context>) {
        let call = CallData::<H>::new(Arc::clone(queue), Arc::downgrade(self), Arc::clone(context));
        let key = call.key();
        self.registry
            .lock()
            .unwrap()
            .insert(key, call.clone() as Arc<dyn CallDataBase>);
        self.registered.fetch_add(1, Ordering::SeqCst);
        trace!(method = H::METHOD, queue = queue.id(), key, "Call state registered");

        call.proceed(true);
    }

    /// Drop the call state registered under `key`. Returns false if unknown.
    pub fn request_clean_up(&self, key: usize) -> bool {
        let removed = self.registry.lock().unwrap().remove(&key);
        match removed {
            Some(_) => {
                self.removed.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Live call states
    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registered_total(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn removed_total(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Release everything still registered. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.registry.lock().unwrap().drain().collect();
        drained.len()
    }
}
