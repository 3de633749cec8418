//! Dispatch Tests - request/reply through a loopback transport
//!
//! These tests drive the dispatcher end to end:
//! - target set checks before anything is sent
//! - synchronous calls answered or timed out
//! - asynchronous callbacks and futures, including duplicate replies
//! - stateless async replies routed by method ID and request message ID
//! - many concurrent asynchronous calls

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;

use common::*;
use interlink::message::Reply;
use interlink::{
    ApplicationError, CallOutcome, Error, Message, MessagingConfig, MessagingQos, MethodDescriptor,
    ParticipantId, Payload, ReplyCallback, ReplyContext, ReplyOutcome, ResolvedTargets, Routed,
    StatelessAsyncIdCalculator, StatelessBinding, StatelessCallback,
};

fn reply_message(request_reply_id: &str, value: &'static [u8]) -> Message {
    Message::new(
        ParticipantId::new("P1"),
        "consumer",
        Duration::from_secs(60),
        Payload::Reply(Reply::response(request_reply_id, Bytes::from_static(value))),
    )
}

/// Test: a synchronous call answered by the provider returns the payload
/// and leaves no pending entry behind
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_call_end_to_end() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    stack
        .transport
        .respond_with(|request| Some(ReplyOutcome::Response(request.params.clone())));

    let dispatcher = stack.dispatcher.clone();
    let result = tokio::task::spawn_blocking(move || {
        dispatcher.call_sync(
            &MethodDescriptor::sync("getStation").with_params(["String"]),
            Bytes::from_static(b"FM4"),
            &targets(&["P1"]),
            &MessagingQos::with_ttl(Duration::from_secs(5)),
        )
    })
    .await
    .unwrap();

    assert_eq!(result.unwrap(), Bytes::from_static(b"FM4"));
    assert_eq!(stack.directory.len(), 0);
    assert_eq!(stack.transport.sent_count(), 1);
}

/// Test: more than one target is rejected for sync and async calls
#[tokio::test]
async fn test_ambiguous_targets_send_nothing() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let two = targets(&["P1", "P2"]);
    let qos = MessagingQos::default();

    let sync = stack
        .dispatcher
        .call_sync(&MethodDescriptor::sync("getStation"), Bytes::new(), &two, &qos);
    assert!(matches!(sync, Err(Error::AmbiguousTarget { count: 2, .. })));

    let called = Arc::new(AtomicUsize::new(0));
    let counter = called.clone();
    let callback: Box<dyn ReplyCallback> = Box::new(move |_: CallOutcome| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let async_call = stack.dispatcher.call_async(
        &MethodDescriptor::async_with_callback("getStation"),
        Bytes::new(),
        &two,
        &qos,
        Some(callback),
    );
    assert!(matches!(async_call, Err(Error::AmbiguousTarget { count: 2, .. })));

    assert_eq!(stack.transport.sent_count(), 0);
    assert!(stack.directory.is_empty());
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

/// Test: an empty target set fails before sending or registering
#[tokio::test]
async fn test_empty_targets_rejected() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let none = ResolvedTargets::default();
    let qos = MessagingQos::default();

    let one_way = stack
        .dispatcher
        .call_one_way(&MethodDescriptor::one_way("shuffle"), Bytes::new(), &none, &qos);
    assert!(matches!(one_way, Err(Error::NoTarget(_))));

    let sync = stack
        .dispatcher
        .call_sync(&MethodDescriptor::sync("getStation"), Bytes::new(), &none, &qos);
    assert!(matches!(sync, Err(Error::NoTarget(_))));

    let async_call = stack.dispatcher.call_async(
        &MethodDescriptor::async_with_callback("getStation"),
        Bytes::new(),
        &none,
        &qos,
        None,
    );
    assert!(matches!(async_call, Err(Error::NoTarget(_))));

    assert_eq!(stack.transport.sent_count(), 0);
    assert!(stack.directory.is_empty());
}

/// Test: one-way calls fan out to every target
#[tokio::test]
async fn test_one_way_fan_out() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    stack
        .dispatcher
        .call_one_way(
            &MethodDescriptor::one_way("shuffle"),
            Bytes::new(),
            &targets(&["P1", "P2", "P3"]),
            &MessagingQos::default().header("trace", "abc"),
        )
        .unwrap();

    let sent = stack.transport.sent();
    let recipients: Vec<&str> = sent.iter().map(|m| m.recipient.as_str()).collect();
    assert_eq!(recipients, vec!["P1", "P2", "P3"]);
    assert!(sent
        .iter()
        .all(|m| m.headers.get("trace").map(String::as_str) == Some("abc")));
    assert!(stack.directory.is_empty());
}

/// Test: a second reply with the same correlation ID changes nothing
#[tokio::test]
async fn test_duplicate_reply_ignored() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let completions = Arc::new(Mutex::new(Vec::new()));
    let recorded = completions.clone();
    let callback: Box<dyn ReplyCallback> = Box::new(move |outcome: CallOutcome| {
        recorded.lock().push(outcome);
    });

    let future = stack
        .dispatcher
        .call_async(
            &MethodDescriptor::async_with_callback("getStation"),
            Bytes::new(),
            &targets(&["P1"]),
            &MessagingQos::default(),
            Some(callback),
        )
        .unwrap();
    let request_reply_id = future.request_reply_id().to_string();

    let first = stack
        .transport
        .deliver(reply_message(&request_reply_id, b"first"))
        .unwrap();
    let second = stack
        .transport
        .deliver(reply_message(&request_reply_id, b"second"))
        .unwrap();

    assert_eq!(first, Routed::Delivered);
    assert_eq!(second, Routed::Unclaimed);
    assert_eq!(future.await.unwrap(), Bytes::from_static(b"first"));

    let completions = completions.lock();
    assert_eq!(completions.len(), 1);
    assert_eq!(
        completions[0].as_ref().unwrap(),
        &Bytes::from_static(b"first")
    );
    assert!(stack.directory.is_empty());
}

/// Test: an unanswered synchronous call times out within TTL plus slack
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_call_times_out() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let ttl = Duration::from_millis(200);
    let dispatcher = stack.dispatcher.clone();

    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        dispatcher.call_sync(
            &MethodDescriptor::sync("getStation"),
            Bytes::new(),
            &targets(&["P1"]),
            &MessagingQos::with_ttl(ttl),
        )
    })
    .await
    .unwrap();
    let elapsed = started.elapsed();

    match result {
        Err(Error::Timeout { ttl: reported, .. }) => assert_eq!(reported, ttl),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed >= ttl);
    assert!(elapsed < ttl + Duration::from_secs(1));
    assert!(stack.directory.is_empty());
    assert_eq!(stack.transport.sent_count(), 1);
}

/// Test: an unanswered asynchronous call completes callback and future
/// with a timeout
#[tokio::test]
async fn test_async_call_times_out() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let timed_out = Arc::new(AtomicUsize::new(0));
    let counter = timed_out.clone();
    let callback: Box<dyn ReplyCallback> = Box::new(move |outcome: CallOutcome| {
        if matches!(outcome, Err(ref e) if e.is_timeout()) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let future = stack
        .dispatcher
        .call_async(
            &MethodDescriptor::async_with_callback("getStation"),
            Bytes::new(),
            &targets(&["P1"]),
            &MessagingQos::with_ttl(Duration::from_millis(100)),
            Some(callback),
        )
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timeout must be reported");
    assert!(outcome.unwrap_err().is_timeout());
    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
    assert!(stack.directory.is_empty());
}

/// Test: modeled errors arrive as application errors, not runtime failures
#[tokio::test]
async fn test_application_error_reply() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    stack.transport.respond_with(|_| {
        Some(ReplyOutcome::ApplicationError(ApplicationError::new(
            "vehicle.Radio.AddFavoriteStationErrorEnum",
            "DUPLICATE_RADIOSTATION",
        )))
    });

    let future = stack
        .dispatcher
        .call_async(
            &MethodDescriptor::async_with_callback("addFavoriteStation").with_modeled_errors(),
            Bytes::new(),
            &targets(&["P1"]),
            &MessagingQos::default(),
            None,
        )
        .unwrap();

    match future.await {
        Err(Error::Application(error)) => assert_eq!(error.value, "DUPLICATE_RADIOSTATION"),
        other => panic!("expected application error, got {:?}", other),
    }
}

#[derive(Default)]
struct RecordingStatelessCallback {
    replies: Mutex<Vec<(ReplyContext, CallOutcome)>>,
}

impl StatelessCallback for RecordingStatelessCallback {
    fn on_reply(&self, context: &ReplyContext, outcome: CallOutcome) {
        self.replies.lock().push((context.clone(), outcome));
    }
}

/// Test: concurrent stateless calls of one method are told apart by the
/// request message ID echoed in each reply
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stateless_async_round_trip() {
    init_logging();

    const NUM_CALLS: usize = 8;

    let binding = StatelessBinding::new("consumer-fixed", "vehicle/Radio", "dashboard");
    let stack = ConsumerStack::build(
        MessagingConfig::default(),
        |dispatcher| dispatcher.with_stateless_binding(binding.clone()),
        |subscriptions| subscriptions,
    );
    stack
        .transport
        .respond_with(|request| Some(ReplyOutcome::Response(request.params.clone())));

    let callback = Arc::new(RecordingStatelessCallback::default());
    stack
        .dispatcher
        .register_stateless_callback(callback.clone())
        .unwrap();

    let method = MethodDescriptor::stateless("addFavoriteStation").with_params(["RadioStation"]);
    let mut handles = Vec::new();
    for call in 0..NUM_CALLS {
        let dispatcher = stack.dispatcher.clone();
        let method = method.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let station = Bytes::from(format!("station-{}", call));
            let mut message_id = None;
            dispatcher
                .call_stateless_async(
                    &method,
                    station.clone(),
                    &targets(&["P1"]),
                    &MessagingQos::default(),
                    |id| message_id = Some(id.to_string()),
                )
                .unwrap();
            (message_id.expect("message id reported"), station)
        }));
    }
    let issued: HashMap<String, Bytes> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();
    assert_eq!(issued.len(), NUM_CALLS);

    let sent = stack.transport.sent();
    assert!(sent
        .iter()
        .all(|m| m.sender == ParticipantId::new("consumer-fixed") && issued.contains_key(&m.id)));

    // the callback stays registered across replies
    let replies = callback.replies.lock();
    assert_eq!(replies.len(), NUM_CALLS);
    let method_id = StatelessAsyncIdCalculator::method_id(&method);
    for (context, outcome) in replies.iter() {
        assert_eq!(context.method_id, method_id);
        let message_id = context
            .request_message_id
            .as_ref()
            .expect("request message id echoed");
        assert_eq!(outcome.as_ref().unwrap(), &issued[message_id]);
    }
    assert!(stack.directory.is_empty());
}

/// Test: many concurrent asynchronous calls each get their own reply
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_calls() {
    init_logging();

    const NUM_CALLS: usize = 200;

    let stack = ConsumerStack::new(MessagingConfig::default());
    stack
        .transport
        .respond_with(|request| Some(ReplyOutcome::Response(request.params.clone())));

    let mut handles = Vec::new();
    for call_id in 0..NUM_CALLS {
        let dispatcher = stack.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let payload = Bytes::from(format!("call_{}", call_id));
            let future = dispatcher
                .call_async(
                    &MethodDescriptor::async_with_callback("echo").with_params(["String"]),
                    payload.clone(),
                    &targets(&["P1"]),
                    &MessagingQos::default(),
                    None,
                )
                .unwrap();
            future.await.unwrap() == payload
        }));
    }

    let results = join_all(handles).await;
    assert_eq!(results.len(), NUM_CALLS);
    assert!(results.into_iter().all(|r| r.unwrap()));
    assert!(stack.directory.is_empty());
    assert_eq!(stack.transport.sent_count(), NUM_CALLS);
}
