//! Asynchronous request serving
//!
//! Calls enter through an [`RpcChannel`], land on one of the server's
//! completion queues and are processed by a [`CallData`] state machine on a
//! servicer thread. Live call states are owned by the [`Collector`].

pub mod call_data;
pub mod collector;
pub mod completion_queue;
pub mod server;
pub mod status;

pub use call_data::{CallData, CallDataBase, CallStatus, RpcHandler};
pub use collector::Collector;
pub use completion_queue::{CompletionQueue, Event, IncomingCall, Responder, Tag};
pub use server::{RpcChannel, RpcServer};
pub use status::{RpcStatus, StatusCode};
