//! In-process completion queue
//!
//! A queue pairs inbound calls with armed receives. Arming registers a tag
//! (non-owning handle to call state) for one method; when a call for that
//! method arrives it is bound to the oldest armed tag and a `(tag, ok = true)`
//! event is queued for the servicer threads. Calls that arrive while nothing
//! is armed wait in a backlog.

use super::call_data::CallDataBase;
use super::status::RpcStatus;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, Weak};
use tokio::sync::oneshot;
use tracing::{debug, warn};

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(1);

pub type Tag = Weak<dyn CallDataBase>;

/// Completion notification for one tag
pub struct Event {
    pub tag: Tag,
    /// False when the operation was cancelled by shutdown
    pub ok: bool,
}

/// Reply channel of one inbound call
#[derive(Debug)]
pub struct Responder(oneshot::Sender<Result<Value, RpcStatus>>);

impl Responder {
    pub fn new(sender: oneshot::Sender<Result<Value, RpcStatus>>) -> Self {
        Self(sender)
    }

    /// Returns false when the caller went away.
    pub fn finish(self, result: Result<Value, RpcStatus>) -> bool {
        self.0.send(result).is_ok()
    }
}

#[derive(Debug)]
pub struct IncomingCall {
    pub method: String,
    pub payload: Value,
    pub responder: Responder,
}

impl IncomingCall {
    pub fn new(method: impl Into<String>, payload: Value) -> (Self, oneshot::Receiver<Result<Value, RpcStatus>>) {
        let (sender, receiver) = oneshot::channel();
        let call = Self {
            method: method.into(),
            payload,
            responder: Responder::new(sender),
        };
        (call, receiver)
    }
}

#[derive(Default)]
struct QueueState {
    armed: HashMap<String, VecDeque<Tag>>,
    backlog: HashMap<String, VecDeque<IncomingCall>>,
    methods: HashSet<String>,
    events: VecDeque<Event>,
    shutdown: bool,
}

pub struct CompletionQueue {
    id: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Arm a receive for `method`. After shutdown the tag gets an `ok = false`
    /// event instead.
    pub fn request_call(&self, method: &str, tag: Tag) {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            state.events.push_back(Event { tag, ok: false });
            self.ready.notify_one();
            return;
        }

        state.methods.insert(method.to_string());
        let waiting = state.backlog.get_mut(method).and_then(|calls| calls.pop_front());
        match waiting {
            Some(call) => Self::bind(&mut state, tag, call),
            None => state.armed.entry(method.to_string()).or_default().push_back(tag),
        }
        self.ready.notify_one();
    }

    /// Hand an inbound call to the queue.
    pub fn deliver(&self, call: IncomingCall) {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            call.responder
                .finish(Err(RpcStatus::unavailable("server is shutting down")));
            return;
        }
        if !state.methods.contains(&call.method) {
            let message = format!("unknown method {}", call.method);
            call.responder.finish(Err(RpcStatus::unimplemented(message)));
            return;
        }

        loop {
            let armed = state
                .armed
                .get_mut(&call.method)
                .and_then(|tags| tags.pop_front());
            match armed {
                // Skip receives whose call state is already gone
                Some(tag) if tag.strong_count() == 0 => continue,
                Some(tag) => {
                    Self::bind(&mut state, tag, call);
                    self.ready.notify_one();
                    return;
                }
                None => {
                    debug!(queue = self.id, method = %call.method, "No armed receive, buffering call");
                    state.backlog.entry(call.method.clone()).or_default().push_back(call);
                    return;
                }
            }
        }
    }

    fn bind(state: &mut QueueState, tag: Tag, call: IncomingCall) {
        match tag.upgrade() {
            Some(target) => {
                target.bind(call);
                state.events.push_back(Event { tag, ok: true });
            }
            None => {
                warn!(method = %call.method, "Armed receive vanished before binding");
                call.responder
                    .finish(Err(RpcStatus::unavailable("call state was released")));
            }
        }
    }

    /// Queue a completion event for `tag`.
    pub fn post_event(&self, tag: Tag, ok: bool) {
        let mut state = self.state.lock().unwrap();
        state.events.push_back(Event { tag, ok });
        self.ready.notify_one();
    }

    /// Block for the next event. Returns `None` once shut down and drained.
    pub fn next(&self) -> Option<Event> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.shutdown {
                return None;
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Cancel armed receives, reject buffered calls and let `next` drain.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.shutdown = true;

        let armed: Vec<Tag> = state.armed.drain().flat_map(|(_, tags)| tags).collect();
        for tag in armed {
            state.events.push_back(Event { tag, ok: false });
        }
        for (_, calls) in state.backlog.drain() {
            for call in calls {
                call.responder
                    .finish(Err(RpcStatus::unavailable("server is shutting down")));
            }
        }
        self.ready.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }

    /// Receives currently armed for `method`
    pub fn armed_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .armed
            .get(method)
            .map_or(0, VecDeque::len)
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
