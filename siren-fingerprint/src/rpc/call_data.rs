//! Per-call state machine
//!
//! CREATE arms a receive on the owning queue. PROCESS registers the
//! replacement receive, runs the handler and finishes the call. FINISH asks
//! the collector to release the instance.

use super::collector::Collector;
use super::completion_queue::{CompletionQueue, IncomingCall, Tag};
use super::status::RpcStatus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Create,
    Process,
    Finish,
}

/// Type-erased call state, as stored by the collector and targeted by events.
pub trait CallDataBase: Send + Sync {
    /// Advance the state machine for one completion event.
    fn proceed(&self, ok: bool);

    /// Attach the inbound call matched to this instance's armed receive.
    fn bind(&self, call: IncomingCall);

    fn status(&self) -> CallStatus;

    fn method(&self) -> &'static str;
}

/// One unary RPC method.
pub trait RpcHandler: Send + Sync + 'static {
    type Context: Send + Sync + 'static;
    type Request: DeserializeOwned;
    type Reply: Default + Serialize;

    const METHOD: &'static str;

    /// Fill `reply` for `request`. Runs on a servicer thread and may block.
    fn handle(context: &Self::Context, request: Self::Request, reply: &mut Self::Reply);
}

struct CallState {
    status: CallStatus,
    call: Option<IncomingCall>,
}

pub struct CallData<H: RpcHandler> {
    me: Weak<CallData<H>>,
    queue: Arc<CompletionQueue>,
    collector: Weak<Collector>,
    context: Arc<H::Context>,
    state: Mutex<CallState>,
}

impl<H: RpcHandler> CallData<H> {
    pub fn new(queue: Arc<CompletionQueue>, collector: Weak<Collector>, context: Arc<H::Context>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            queue,
            collector,
            context,
            state: Mutex::new(CallState {
                status: CallStatus::Create,
                call: None,
            }),
        })
    }

    /// Identity used by the collector
    pub fn key(&self) -> usize {
        self.me.as_ptr() as *const () as usize
    }

    fn tag(&self) -> Tag {
        self.me.clone()
    }

    fn set_status(&self, status: CallStatus) {
        self.state.lock().unwrap().status = status;
    }

    fn respond(&self, call: IncomingCall) {
        let result = match serde_json::from_value::<H::Request>(call.payload) {
            Ok(request) => {
                let mut reply = H::Reply::default();
                H::handle(&self.context, request, &mut reply);
                serde_json::to_value(&reply)
                    .map_err(|e| RpcStatus::internal(format!("failed to encode reply: {}", e)))
            }
            Err(e) => {
                warn!(method = H::METHOD, "Rejecting malformed request: {}", e);
                Err(RpcStatus::invalid_argument(e.to_string()))
            }
        };
        if !call.responder.finish(result) {
            debug!(method = H::METHOD, "Caller left before the reply was sent");
        }
    }

    fn release(&self) {
        let key = self.key();
        match self.collector.upgrade() {
            Some(collector) => {
                if !collector.request_clean_up(key) {
                    error!(method = H::METHOD, key, "Call state was not registered, leaking it");
                }
            }
            None => error!(
                method = H::METHOD,
                key, "Collector no longer exists, skipping call state clean-up"
            ),
        }
    }
}

impl<H: RpcHandler> CallDataBase for CallData<H> {
    fn proceed(&self, ok: bool) {
        let status = self.status();
        match status {
            CallStatus::Create if ok => {
                self.set_status(CallStatus::Process);
                self.queue.request_call(H::METHOD, self.tag());
            }
            CallStatus::Process if ok => {
                // Keep one receive armed for this method before doing any work
                match self.collector.upgrade() {
                    Some(collector) => collector.create_call_data::<H>(&self.queue, &self.context),
                    None => error!(method = H::METHOD, "Collector gone, cannot re-arm receive"),
                }

                let call = self.state.lock().unwrap().call.take();
                match call {
                    Some(call) => self.respond(call),
                    None => error!(method = H::METHOD, "Process event without a bound call"),
                }

                self.set_status(CallStatus::Finish);
                self.queue.post_event(self.tag(), true);
            }
            CallStatus::Finish => {
                self.release();
            }
            CallStatus::Create | CallStatus::Process => {
                debug!(method = H::METHOD, ?status, "Receive cancelled");
                if let Some(call) = self.state.lock().unwrap().call.take() {
                    call.responder
                        .finish(Err(RpcStatus::unavailable("server is shutting down")));
                }
                self.set_status(CallStatus::Finish);
                self.release();
            }
        }
    }

    fn bind(&self, call: IncomingCall) {
        self.state.lock().unwrap().call = Some(call);
    }

    fn status(&self) -> CallStatus {
        self.state.lock().unwrap().status
    }

    fn method(&self) -> &'static str {
        H::METHOD
    }
}
