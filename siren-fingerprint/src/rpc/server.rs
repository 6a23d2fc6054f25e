//! RPC server: completion queues plus their servicer threads

use super::call_data::RpcHandler;
use super::collector::Collector;
use super::completion_queue::{CompletionQueue, IncomingCall};
use super::status::RpcStatus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

type Registration = Box<dyn Fn(&Arc<Collector>, &Arc<CompletionQueue>) + Send + Sync>;

/// Counter that can be waited on until it returns to zero
#[derive(Default)]
struct ActivityCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActivityCounter {
    fn enter(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap()
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.idle.wait(count).unwrap();
        }
    }
}

pub struct RpcServer {
    queues: Vec<Arc<CompletionQueue>>,
    threads_per_queue: usize,
    collector: Arc<Collector>,
    registrations: Vec<(&'static str, Registration)>,
    active: Arc<ActivityCounter>,
    workers: Vec<JoinHandle<()>>,
    channel: RpcChannel,
    running: bool,
}

impl RpcServer {
    /// Zero counts are raised to one.
    pub fn new(queue_count: usize, threads_per_queue: usize) -> Self {
        let queues: Vec<Arc<CompletionQueue>> = (0..queue_count.max(1))
            .map(|_| Arc::new(CompletionQueue::new()))
            .collect();
        let channel = RpcChannel::new(queues.clone());
        Self {
            queues,
            threads_per_queue: threads_per_queue.max(1),
            collector: Collector::new(),
            registrations: Vec::new(),
            active: Arc::new(ActivityCounter::default()),
            workers: Vec::new(),
            channel,
            running: false,
        }
    }

    /// Add a method. Must be called before `run`.
    pub fn register<H: RpcHandler>(&mut self, context: Arc<H::Context>) {
        if self.running {
            warn!(method = H::METHOD, "Cannot register a method on a running server");
            return;
        }
        let registration: Registration = Box::new(move |collector, queue| {
            collector.create_call_data::<H>(queue, &context);
        });
        self.registrations.push((H::METHOD, registration));
    }

    /// Arm one receive per method on every queue and start the servicer threads.
    pub fn run(&mut self) -> std::io::Result<()> {
        if self.running {
            return Ok(());
        }
        if self.registrations.is_empty() {
            warn!("Starting RPC server without any registered method");
        }

        for queue in &self.queues {
            for (_, register) in &self.registrations {
                register(&self.collector, queue);
            }
        }

        for (queue_index, queue) in self.queues.iter().enumerate() {
            for thread_index in 0..self.threads_per_queue {
                let queue = Arc::clone(queue);
                let active = Arc::clone(&self.active);
                let handle = thread::Builder::new()
                    .name(format!("siren-rpc-{}-{}", queue_index, thread_index))
                    .spawn(move || Self::service(queue, active))?;
                self.workers.push(handle);
            }
        }
        self.running = true;

        let methods: Vec<&str> = self.registrations.iter().map(|(method, _)| *method).collect();
        info!(
            queues = self.queues.len(),
            threads_per_queue = self.threads_per_queue,
            ?methods,
            "RPC server started"
        );
        Ok(())
    }

    fn service(queue: Arc<CompletionQueue>, active: Arc<ActivityCounter>) {
        while let Some(event) = queue.next() {
            let Some(call) = event.tag.upgrade() else {
                debug!(queue = queue.id(), "Event for released call state, ignoring");
                continue;
            };
            active.enter();
            call.proceed(event.ok);
            active.leave();
        }
        debug!(queue = queue.id(), "Completion queue drained, servicer exiting");
    }

    /// Client handle for transports
    pub fn channel(&self) -> RpcChannel {
        self.channel.clone()
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn active_tasks(&self) -> usize {
        self.active.get()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop accepting calls, let in-flight calls finish, then tear down the
    /// queues and join every servicer. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.running && self.workers.is_empty() {
            return;
        }
        info!("Shutting down RPC server");

        self.channel.close();
        self.channel.wait_idle();
        self.active.wait_idle();

        for queue in &self.queues {
            queue.shutdown();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("RPC servicer thread panicked");
            }
        }
        self.running = false;

        let leaked = self.collector.clear();
        if leaked > 0 {
            warn!(leaked, "Released call states left after shutdown");
        }
        info!(
            registered = self.collector.registered_total(),
            removed = self.collector.removed_total(),
            "RPC server stopped"
        );
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ChannelInner {
    queues: Vec<Arc<CompletionQueue>>,
    next: AtomicUsize,
    /// (accepting, in flight)
    state: Mutex<(bool, usize)>,
    idle: Condvar,
}

/// Client side of the server. Calls are spread round-robin over the queues.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

struct InFlight<'a>(&'a ChannelInner);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.1 = state.1.saturating_sub(1);
        if state.1 == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl RpcChannel {
    fn new(queues: Vec<Arc<CompletionQueue>>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                queues,
                next: AtomicUsize::new(0),
                state: Mutex::new((true, 0)),
                idle: Condvar::new(),
            }),
        }
    }

    fn enter(&self) -> Result<InFlight<'_>, RpcStatus> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.0 {
            return Err(RpcStatus::unavailable("server is shutting down"));
        }
        state.1 += 1;
        Ok(InFlight(&self.inner))
    }

    /// Invoke `method` with a JSON payload.
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value, RpcStatus> {
        let _in_flight = self.enter()?;
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.queues.len();
        let (call, reply) = IncomingCall::new(method, payload);
        self.inner.queues[index].deliver(call);

        reply
            .await
            .unwrap_or_else(|_| Err(RpcStatus::internal("call dropped without a reply")))
    }

    /// Typed wrapper over [`RpcChannel::call`]
    pub async fn invoke<Req, Rep>(&self, method: &str, request: &Req) -> Result<Rep, RpcStatus>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| RpcStatus::invalid_argument(e.to_string()))?;
        let reply = self.call(method, payload).await?;
        serde_json::from_value(reply).map_err(|e| RpcStatus::internal(e.to_string()))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().unwrap().1
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.state.lock().unwrap().0
    }

    fn close(&self) {
        self.inner.state.lock().unwrap().0 = false;
    }

    fn wait_idle(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.1 > 0 {
            state = self.inner.idle.wait(state).unwrap();
        }
    }
}
