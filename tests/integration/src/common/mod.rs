//! Shared test fixtures
//!
//! Each test binary pulls this in with `mod common;` and uses a subset.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use interlink::message::{OneWayRequest, Reply, Request};
use interlink::{
    BinaryCodec, InvocationDispatcher, Message, MessageCodec, MessageProcessedListener,
    MessageReceiver, MessageRouter, MessageSender, MessagingConfig, ParticipantId, Payload,
    ProviderEntry, ReplyCallerDirectory, ReplyOutcome, ResolvedTargets, SubscriptionManager,
};
use interlink_mqtt::{MqttClient, MqttStatusReceiver};

static INIT: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn targets(ids: &[&str]) -> ResolvedTargets {
    ids.iter().map(|id| ProviderEntry::local(*id)).collect()
}

type Responder = Box<dyn Fn(&Request) -> Option<ReplyOutcome> + Send + Sync>;

/// In-process transport recording every outbound message
///
/// Requests may be answered right away by a scripted responder; replies are
/// fed into the connected receiver.
#[derive(Default)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<Message>>,
    responder: Mutex<Option<Responder>>,
    receiver: Mutex<Option<Arc<MessageReceiver>>>,
}

impl LoopbackTransport {
    pub fn connect(&self, receiver: Arc<MessageReceiver>) {
        *self.receiver.lock() = Some(receiver);
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Request) -> Option<ReplyOutcome> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Deliver a message to the connected receiver as if it came off the wire
    pub fn deliver(&self, message: Message) -> interlink::Result<interlink::Routed> {
        let receiver = self.receiver.lock().clone();
        match receiver {
            Some(receiver) => {
                let frame = BinaryCodec.encode(&message)?;
                receiver.receive_bytes(&BinaryCodec, &frame)
            }
            None => Err(interlink::Error::Transport("loopback not connected".to_string())),
        }
    }

    fn answer(&self, message: &Message) -> Option<Message> {
        let Payload::Request(request) = &message.payload else {
            return None;
        };
        let responder = self.responder.lock();
        let outcome = (responder.as_ref()?)(request)?;
        Some(Message::new(
            ParticipantId::new(message.recipient.clone()),
            message.sender.as_str(),
            Duration::from_secs(60),
            Payload::Reply(Reply::to_request(request, outcome).with_request_message_id(&message.id)),
        ))
    }
}

impl MessageSender for LoopbackTransport {
    fn send(&self, message: Message) -> interlink::Result<()> {
        let reply = self.answer(&message);
        self.sent.lock().push(message);
        if let Some(reply) = reply {
            debug!("loopback reply {} to {}", reply.id, reply.recipient);
            self.deliver(reply)?;
        }
        Ok(())
    }
}

/// Consumer side wired to a loopback transport
pub struct ConsumerStack {
    pub transport: Arc<LoopbackTransport>,
    pub directory: Arc<ReplyCallerDirectory>,
    pub dispatcher: Arc<InvocationDispatcher>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub receiver: Arc<MessageReceiver>,
}

impl ConsumerStack {
    pub fn new(config: MessagingConfig) -> Self {
        Self::build(config, |dispatcher| dispatcher, |subscriptions| subscriptions)
    }

    pub fn build(
        config: MessagingConfig,
        dispatcher: impl FnOnce(InvocationDispatcher) -> InvocationDispatcher,
        subscriptions: impl FnOnce(SubscriptionManager) -> SubscriptionManager,
    ) -> Self {
        let transport = Arc::new(LoopbackTransport::default());
        let sender: Arc<dyn MessageSender> = transport.clone();
        let directory = Arc::new(ReplyCallerDirectory::new());
        let dispatcher = Arc::new(dispatcher(InvocationDispatcher::new(
            ParticipantId::new("consumer"),
            directory.clone(),
            sender.clone(),
            config.clone(),
        )));
        let subscriptions = Arc::new(subscriptions(SubscriptionManager::new(sender, config)));
        let receiver = Arc::new(MessageReceiver::new(directory.clone(), subscriptions.clone()));
        transport.connect(receiver.clone());
        Self {
            transport,
            directory,
            dispatcher,
            subscriptions,
            receiver,
        }
    }
}

/// Broker connection double
#[derive(Default)]
pub struct RecordingMqttClient {
    pub subscribed: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub acked: Mutex<Vec<u32>>,
}

impl RecordingMqttClient {
    pub fn acked(&self) -> Vec<u32> {
        let mut acked = self.acked.lock().clone();
        acked.sort_unstable();
        acked
    }
}

impl MqttClient for RecordingMqttClient {
    fn subscribe(&self, topic: &str) -> interlink_mqtt::Result<()> {
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> interlink_mqtt::Result<()> {
        self.unsubscribed.lock().push(topic.to_string());
        Ok(())
    }

    fn acknowledge(&self, transport_message_id: u32, _qos: u8) {
        self.acked.lock().push(transport_message_id);
    }
}

/// Router double that completes messages on demand
#[derive(Default)]
pub struct RecordingRouter {
    routed: Mutex<Vec<Message>>,
    listeners: Mutex<Vec<Arc<dyn MessageProcessedListener>>>,
}

impl RecordingRouter {
    pub fn routed_ids(&self) -> Vec<String> {
        self.routed.lock().iter().map(|m| m.id.clone()).collect()
    }

    pub fn routed_count(&self) -> usize {
        self.routed.lock().len()
    }

    /// Report a message as processed to every registered listener
    pub fn complete(&self, message_id: &str) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.message_processed(message_id);
        }
    }
}

impl MessageRouter for RecordingRouter {
    fn route(&self, message: Message) -> interlink::Result<()> {
        self.routed.lock().push(message);
        Ok(())
    }

    fn register_message_processed_listener(&self, listener: Arc<dyn MessageProcessedListener>) {
        self.listeners.lock().push(listener);
    }
}

#[derive(Default)]
pub struct CountingStatusReceiver {
    pub dropped: Mutex<usize>,
}

impl MqttStatusReceiver for CountingStatusReceiver {
    fn notify_message_dropped(&self) {
        *self.dropped.lock() += 1;
    }
}

/// Encoded one-way request with a fresh message ID
pub fn one_way_frame(method: &str) -> (String, Bytes) {
    let message = Message::new(
        ParticipantId::new("remote-consumer"),
        "local-provider",
        Duration::from_secs(60),
        Payload::OneWay(OneWayRequest {
            method_name: method.to_string(),
            param_datatypes: Vec::new(),
            params: Bytes::new(),
        }),
    );
    let frame = BinaryCodec
        .encode(&message)
        .expect("one-way request encodes");
    (message.id, frame)
}
