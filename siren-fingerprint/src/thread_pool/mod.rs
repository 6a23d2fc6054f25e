//! Worker pool: queues, dispatch, submission and the process-wide instance

pub mod dispatch;
pub mod pool;
pub mod task;

pub use dispatch::QueueDispatch;
pub use pool::{ThreadPool, WorkSubmitter};
pub use task::{Callback, WaitableFuture};

use crate::config::ThreadPoolConfig;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Default)]
struct ManagerState {
    settings: Option<ThreadPoolConfig>,
    pool: Option<Arc<ThreadPool>>,
}

static MANAGER: Lazy<Mutex<ManagerState>> = Lazy::new(|| Mutex::new(ManagerState::default()));

/// Process-wide shared pool.
///
/// `init` configures it before first use; `instance` creates it lazily
/// (from the environment when `init` was never called); `shutdown` drains
/// and releases it at process exit.
pub struct AsyncManager;

impl AsyncManager {
    /// Set the pool configuration. Ignored (with a warning) once the pool exists.
    pub fn init(settings: ThreadPoolConfig) {
        let mut state = MANAGER.lock().unwrap();
        if state.pool.is_some() {
            warn!("AsyncManager already running; ignoring new pool settings");
            return;
        }
        state.settings = Some(settings);
    }

    pub fn instance() -> Arc<ThreadPool> {
        let mut state = MANAGER.lock().unwrap();
        if let Some(pool) = &state.pool {
            return Arc::clone(pool);
        }

        let settings = state
            .settings
            .clone()
            .unwrap_or_else(ThreadPoolConfig::from_env);
        info!(
            queues = settings.queues,
            threads_per_queue = settings.threads_per_queue,
            "Creating process-wide thread pool"
        );
        let pool = Arc::new(ThreadPool::new(
            settings.queues,
            settings.threads_per_queue,
            settings.graceful,
        ));
        state.pool = Some(Arc::clone(&pool));
        pool
    }

    pub fn submitter() -> WorkSubmitter {
        WorkSubmitter::new(Self::instance())
    }

    pub fn is_running() -> bool {
        MANAGER.lock().unwrap().pool.is_some()
    }

    /// Shut the shared pool down. Safe to call more than once.
    pub fn shutdown() {
        let pool = MANAGER.lock().unwrap().pool.take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }
}
