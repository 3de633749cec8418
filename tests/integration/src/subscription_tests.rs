//! Subscription Tests - lifecycle through a loopback transport
//!
//! These tests exercise:
//! - fan-out of subscribe and stop requests to every provider
//! - confirmation, rejection and ordered publication delivery
//! - QoS expiry and missed publication alerts
//! - multicast subscriptions wired into the MQTT skeleton

mod common;

use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use common::*;
use interlink::message::{MulticastPublication, Publication, SubscriptionReply};
use interlink::{
    AttributeSubscribeInvocation, BinaryCodec, BroadcastSubscribeInvocation, Error, Message,
    MessagingConfig, MulticastSubscribeInvocation, ParticipantId, Payload, Routed,
    SubscriptionListener, SubscriptionQos, UnsubscribeInvocation,
};
use interlink_mqtt::{MessageInProgressObserver, MqttConfig, MqttMessagingSkeleton};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Subscribed(String),
    Value(Bytes),
    Error(String),
}

struct ChannelListener {
    events: UnboundedSender<Event>,
}

impl SubscriptionListener for ChannelListener {
    fn on_subscribed(&self, subscription_id: &str) {
        let _ = self.events.send(Event::Subscribed(subscription_id.to_string()));
    }

    fn on_receive(&self, value: Bytes) {
        let _ = self.events.send(Event::Value(value));
    }

    fn on_error(&self, error: &Error) {
        let _ = self.events.send(Event::Error(error.to_string()));
    }
}

fn listener() -> (Arc<dyn SubscriptionListener>, UnboundedReceiver<Event>) {
    let (tx, rx) = unbounded_channel();
    (Arc::new(ChannelListener { events: tx }), rx)
}

async fn next_event(events: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("listener event within 2s")
        .expect("listener channel open")
}

fn from_provider(provider: &str, recipient: &str, payload: Payload) -> Message {
    Message::new(
        ParticipantId::new(provider),
        recipient,
        Duration::from_secs(60),
        payload,
    )
}

fn subscription_reply(subscription_id: &str, error: Option<&str>) -> Message {
    from_provider(
        "P1",
        "consumer",
        Payload::SubscriptionReply(SubscriptionReply {
            subscription_id: subscription_id.to_string(),
            error: error.map(str::to_string),
        }),
    )
}

fn publication(subscription_id: &str, value: Bytes) -> Message {
    from_provider(
        "P1",
        "consumer",
        Payload::Publication(Publication {
            subscription_id: subscription_id.to_string(),
            value: Ok(value),
        }),
    )
}

/// Test: a broadcast subscription on two providers is stopped at both
#[tokio::test]
async fn test_unsubscribe_reaches_every_target() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let both = targets(&["P1", "P2"]);
    let (listener, _events) = listener();

    let future = stack
        .subscriptions
        .register_broadcast_subscription(
            stack.dispatcher.participant_id(),
            &both,
            BroadcastSubscribeInvocation::new("weakSignal", SubscriptionQos::default(), listener)
                .filter("genre", "jazz"),
        )
        .unwrap();
    let subscription_id = future.subscription_id().to_string();

    let requests: Vec<String> = stack
        .transport
        .sent()
        .into_iter()
        .filter(|m| matches!(m.payload, Payload::SubscriptionRequest(_)))
        .map(|m| m.recipient)
        .collect();
    assert_eq!(requests, vec!["P1".to_string(), "P2".to_string()]);

    stack
        .subscriptions
        .unregister_subscription(
            stack.dispatcher.participant_id(),
            &both,
            UnsubscribeInvocation::new(subscription_id.clone()),
        )
        .unwrap();

    let mut stopped: Vec<String> = stack
        .transport
        .sent()
        .into_iter()
        .filter_map(|m| match m.payload {
            Payload::SubscriptionStop(stop) if stop.subscription_id == subscription_id => {
                Some(m.recipient)
            }
            _ => None,
        })
        .collect();
    stopped.sort();
    assert_eq!(stopped, vec!["P1".to_string(), "P2".to_string()]);
    assert!(!stack.subscriptions.contains(&subscription_id));
}

/// Test: confirmation resolves the future once and publications arrive in order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirmed_subscription_delivers_in_order() {
    init_logging();

    const NUM_PUBLICATIONS: usize = 100;

    let stack = ConsumerStack::new(MessagingConfig::default());
    let (listener, mut events) = listener();
    let future = stack
        .subscriptions
        .register_attribute_subscription(
            stack.dispatcher.participant_id(),
            &targets(&["P1"]),
            AttributeSubscribeInvocation::new("currentStation", SubscriptionQos::default(), listener)
                .with_subscription_id("sub-station"),
        )
        .unwrap();

    assert_eq!(
        stack.transport.deliver(subscription_reply("sub-station", None)).unwrap(),
        Routed::Delivered
    );
    // a late second confirmation is absorbed
    stack
        .transport
        .deliver(subscription_reply("sub-station", None))
        .unwrap();
    assert_eq!(future.await.unwrap(), "sub-station");

    for i in 0..NUM_PUBLICATIONS {
        stack
            .transport
            .deliver(publication("sub-station", Bytes::from(i.to_string())))
            .unwrap();
    }

    assert_eq!(
        next_event(&mut events).await,
        Event::Subscribed("sub-station".to_string())
    );
    for i in 0..NUM_PUBLICATIONS {
        assert_eq!(
            next_event(&mut events).await,
            Event::Value(Bytes::from(i.to_string()))
        );
    }
}

/// Test: a rejecting reply fails the future, informs the listener and
/// removes the subscription
#[tokio::test]
async fn test_rejected_subscription() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let (listener, mut events) = listener();
    let future = stack
        .subscriptions
        .register_attribute_subscription(
            stack.dispatcher.participant_id(),
            &targets(&["P1"]),
            AttributeSubscribeInvocation::new("noSuchAttribute", SubscriptionQos::default(), listener),
        )
        .unwrap();
    let subscription_id = future.subscription_id().to_string();

    stack
        .transport
        .deliver(subscription_reply(&subscription_id, Some("unknown attribute")))
        .unwrap();

    assert!(matches!(future.await, Err(Error::Runtime(reason)) if reason == "unknown attribute"));
    assert!(matches!(next_event(&mut events).await, Event::Error(_)));
    assert!(!stack.subscriptions.contains(&subscription_id));
    assert_eq!(
        stack
            .transport
            .deliver(publication(&subscription_id, Bytes::new()))
            .unwrap(),
        Routed::Unclaimed
    );
}

/// Test: an expired subscription stops receiving publications
#[tokio::test]
async fn test_subscription_expiry() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let (listener, _events) = listener();
    let future = stack
        .subscriptions
        .register_attribute_subscription(
            stack.dispatcher.participant_id(),
            &targets(&["P1"]),
            AttributeSubscribeInvocation::new(
                "currentStation",
                SubscriptionQos::default().with_validity(Duration::from_millis(150)),
                listener,
            ),
        )
        .unwrap();
    let subscription_id = future.subscription_id().to_string();
    assert!(stack.subscriptions.contains(&subscription_id));

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!stack.subscriptions.contains(&subscription_id));
    assert_eq!(
        stack
            .transport
            .deliver(publication(&subscription_id, Bytes::new()))
            .unwrap(),
        Routed::Unclaimed
    );
}

/// Test: silence longer than the alert interval is reported as missed publication
#[tokio::test]
async fn test_missed_publication_alert() {
    init_logging();

    let stack = ConsumerStack::new(MessagingConfig::default());
    let (listener, mut events) = listener();
    let future = stack
        .subscriptions
        .register_attribute_subscription(
            stack.dispatcher.participant_id(),
            &targets(&["P1"]),
            AttributeSubscribeInvocation::new(
                "currentStation",
                SubscriptionQos::default().with_alert_after(Duration::from_millis(100)),
                listener,
            ),
        )
        .unwrap();
    let subscription_id = future.subscription_id().to_string();

    match next_event(&mut events).await {
        Event::Error(message) => assert!(message.contains(&subscription_id)),
        other => panic!("expected missed publication, got {:?}", other),
    }
}

/// Test: multicast subscriptions subscribe the broker topic once and match
/// partition wildcards
#[tokio::test]
async fn test_multicast_through_mqtt_skeleton() {
    init_logging();

    let client = Arc::new(RecordingMqttClient::default());
    let skeleton = Arc::new(
        MqttMessagingSkeleton::new(
            MqttConfig::new("replyto/consumer"),
            client.clone(),
            Arc::new(RecordingRouter::default()),
            Arc::new(BinaryCodec),
            Arc::new(MessageInProgressObserver::disabled()),
        )
        .unwrap(),
    );
    skeleton.init().unwrap();

    let registrar = skeleton.clone();
    let stack = ConsumerStack::build(
        MessagingConfig::default(),
        |dispatcher| dispatcher,
        move |subscriptions| subscriptions.with_multicast_registrar(registrar),
    );

    let (first_listener, mut first_events) = listener();
    let (second_listener, mut second_events) = listener();
    let mut subscription_ids = Vec::new();
    for listener in [first_listener, second_listener] {
        let future = stack
            .subscriptions
            .register_multicast_subscription(
                stack.dispatcher.participant_id(),
                &targets(&["P1"]),
                MulticastSubscribeInvocation::new("news", SubscriptionQos::default(), listener)
                    .with_partitions(["europe", "*"]),
            )
            .unwrap();
        subscription_ids.push(future.subscription_id().to_string());
    }

    assert_eq!(
        *client.subscribed.lock(),
        vec!["replyto/consumer/#".to_string(), "P1/news/europe/#".to_string()]
    );

    let multicast = |multicast_id: &str| {
        from_provider(
            "P1",
            multicast_id,
            Payload::Multicast(MulticastPublication {
                multicast_id: multicast_id.to_string(),
                values: Bytes::from_static(b"headline"),
            }),
        )
    };
    assert_eq!(
        stack.transport.deliver(multicast("P1/news/europe/germany/berlin")).unwrap(),
        Routed::Delivered
    );
    assert_eq!(
        stack.transport.deliver(multicast("P1/news/asia")).unwrap(),
        Routed::Unclaimed
    );
    for events in [&mut first_events, &mut second_events] {
        assert_eq!(
            next_event(events).await,
            Event::Value(Bytes::from_static(b"headline"))
        );
    }

    for subscription_id in &subscription_ids {
        stack
            .subscriptions
            .unregister_subscription(
                stack.dispatcher.participant_id(),
                &targets(&["P1"]),
                UnsubscribeInvocation::new(subscription_id.clone()),
            )
            .unwrap();
    }
    assert_eq!(*client.unsubscribed.lock(), vec!["P1/news/europe/#".to_string()]);
    assert!(stack.subscriptions.is_empty());
}
