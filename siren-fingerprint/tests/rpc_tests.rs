//! Completion queue, call state machine and server tests

use serde::{Deserialize, Serialize};
use serde_json::json;
use siren_fingerprint::rpc::{
    CallStatus, Collector, CompletionQueue, IncomingCall, RpcHandler, RpcServer, StatusCode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct EchoRequest {
    value: i64,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct EchoReply {
    value: i64,
    served: usize,
}

/// Echoes the value and counts calls
struct Echo;

impl RpcHandler for Echo {
    type Context = AtomicUsize;
    type Request = EchoRequest;
    type Reply = EchoReply;

    const METHOD: &'static str = "Echo";

    fn handle(served: &AtomicUsize, request: EchoRequest, reply: &mut EchoReply) {
        reply.value = request.value;
        reply.served = served.fetch_add(1, Ordering::SeqCst) + 1;
    }
}

/// Pop one event and run it, as a servicer thread would
fn pump(queue: &CompletionQueue) -> (CallStatus, bool) {
    let event = queue.next().expect("event");
    let call = event.tag.upgrade().expect("live call state");
    let before = call.status();
    call.proceed(event.ok);
    (before, event.ok)
}

// ============================================================================
// Call state machine
// ============================================================================

#[test]
fn test_call_lifecycle_registers_and_removes_once() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    let context = Arc::new(AtomicUsize::new(0));

    collector.create_call_data::<Echo>(&queue, &context);
    assert_eq!(collector.registered_total(), 1);
    assert_eq!(collector.len(), 1);
    assert_eq!(queue.armed_count("Echo"), 1);

    let (call, mut reply) = IncomingCall::new("Echo", json!({"value": 7}));
    queue.deliver(call);
    assert_eq!(queue.pending_events(), 1);

    // PROCESS: replacement armed first, then the reply goes out
    assert_eq!(pump(&queue), (CallStatus::Process, true));
    assert_eq!(collector.registered_total(), 2);
    assert_eq!(queue.armed_count("Echo"), 1);
    let value = reply.try_recv().expect("reply sent").expect("ok status");
    assert_eq!(value, json!({"value": 7, "served": 1}));

    // FINISH: released through the collector
    assert_eq!(pump(&queue), (CallStatus::Finish, true));
    assert_eq!(collector.removed_total(), 1);
    assert_eq!(collector.len(), 1);
    assert_eq!(queue.pending_events(), 0);
}

#[test]
fn test_calls_arriving_early_are_buffered() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    let context = Arc::new(AtomicUsize::new(0));
    collector.create_call_data::<Echo>(&queue, &context);

    let (first, mut first_reply) = IncomingCall::new("Echo", json!({"value": 1}));
    let (second, mut second_reply) = IncomingCall::new("Echo", json!({"value": 2}));
    queue.deliver(first);
    queue.deliver(second);
    assert_eq!(queue.pending_events(), 1);

    // Re-arming during PROCESS picks up the buffered call at once
    pump(&queue);
    assert_eq!(queue.pending_events(), 2);
    while queue.pending_events() > 0 {
        pump(&queue);
    }

    assert_eq!(first_reply.try_recv().unwrap().unwrap()["value"], 1);
    assert_eq!(second_reply.try_recv().unwrap().unwrap()["value"], 2);
    assert_eq!(collector.len(), 1);
}

#[test]
fn test_malformed_request_is_invalid_argument() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    let context = Arc::new(AtomicUsize::new(0));
    collector.create_call_data::<Echo>(&queue, &context);

    let (call, mut reply) = IncomingCall::new("Echo", json!({"value": "seven"}));
    queue.deliver(call);
    pump(&queue);

    let status = reply.try_recv().unwrap().unwrap_err();
    assert_eq!(status.code, StatusCode::InvalidArgument);
    assert_eq!(context.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_method_is_unimplemented() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    collector.create_call_data::<Echo>(&queue, &Arc::new(AtomicUsize::new(0)));

    let (call, mut reply) = IncomingCall::new("Missing", json!({}));
    queue.deliver(call);

    let status = reply.try_recv().unwrap().unwrap_err();
    assert_eq!(status.code, StatusCode::Unimplemented);
}

#[test]
fn test_shutdown_cancels_armed_receives() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    collector.create_call_data::<Echo>(&queue, &Arc::new(AtomicUsize::new(0)));

    queue.shutdown();
    assert_eq!(pump(&queue), (CallStatus::Process, false));
    assert!(collector.is_empty());
    assert!(queue.next().is_none());

    let (late, mut reply) = IncomingCall::new("Echo", json!({"value": 1}));
    queue.deliver(late);
    assert_eq!(reply.try_recv().unwrap().unwrap_err().code, StatusCode::Unavailable);
}

#[test]
fn test_finish_after_collector_dropped_is_tolerated() {
    let queue = Arc::new(CompletionQueue::new());
    let collector = Collector::new();
    collector.create_call_data::<Echo>(&queue, &Arc::new(AtomicUsize::new(0)));

    let (call, _reply) = IncomingCall::new("Echo", json!({"value": 3}));
    queue.deliver(call);
    let event = queue.next().unwrap();
    let state = event.tag.upgrade().unwrap();
    drop(collector);

    // No replacement can be registered and release is skipped, without panicking
    state.proceed(true);
    state.proceed(true);
    assert_eq!(state.status(), CallStatus::Finish);
}

// ============================================================================
// Server
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_round_trip_and_shutdown() {
    let served = Arc::new(AtomicUsize::new(0));
    let mut server = RpcServer::new(2, 2);
    server.register::<Echo>(Arc::clone(&served));
    server.run().unwrap();

    let channel = server.channel();
    let mut calls = Vec::new();
    for value in 0..20 {
        let channel = channel.clone();
        calls.push(tokio::spawn(async move {
            channel
                .invoke::<_, EchoReply>("Echo", &json!({"value": value}))
                .await
        }));
    }
    for (value, call) in calls.into_iter().enumerate() {
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.value, value as i64);
    }
    assert_eq!(served.load(Ordering::SeqCst), 20);
    assert_eq!(channel.in_flight(), 0);

    tokio::task::block_in_place(|| server.shutdown());

    let rejected = channel.call("Echo", json!({"value": 1})).await.unwrap_err();
    assert_eq!(rejected.code, StatusCode::Unavailable);
    assert!(server.collector().is_empty());
    assert_eq!(server.active_tasks(), 0);
}
