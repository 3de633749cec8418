//! MQTT messaging skeleton
//!
//! Receiving end of one broker connection. Raw publishes are decoded, checked
//! against the in-flight ledger and handed to the message router. Only
//! requests and one-way messages count toward `max_incoming_requests`;
//! replies, publications and subscription traffic are never dropped. The
//! broker acknowledgement is sent once the router reports the message as
//! processed, unless backpressure defers it.
//!
//! ```text
//! transmit ──▶ decode ──▶ ledger.admit ──▶ observer ──▶ router.route
//!                │            │ full/dup                     │
//!                ▼            ▼                               ▼
//!          ack + failure     drop                  message_processed
//!                                                    ├─ ack
//!                                                    └─ defer until flush
//! ```
//!
//! Neither the ledger lock nor the observer lock is held while calling into
//! the router, the client or the observer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use bytes::Bytes;
use interlink::subscription::MulticastReceiverRegistrar;
use interlink::{MessageCodec, MessageProcessedListener, MessageRouter, ParticipantId};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use crate::backpressure::{MessageInProgressObserver, OutstandingPublishes};
use crate::client::{
    MqttClient, MqttStatusReceiver, NoOpRawMessagePreprocessor, NoOpStatusReceiver,
    RawMessagePreprocessor,
};
use crate::config::MqttConfig;
use crate::error::{MqttError, Result};
use crate::ledger::{AckHandle, Admission, InFlightLedger};
use crate::topic;

pub struct MqttMessagingSkeleton {
    config: MqttConfig,
    client: Arc<dyn MqttClient>,
    router: Arc<dyn MessageRouter>,
    codec: Arc<dyn MessageCodec>,
    observer: Arc<MessageInProgressObserver>,
    preprocessor: Arc<dyn RawMessagePreprocessor>,
    status_receiver: Arc<dyn MqttStatusReceiver>,
    ledger: Mutex<InFlightLedger>,
    /// Subscribed multicast topics with their reference counts
    multicast_topics: Mutex<HashMap<String, usize>>,
    dropped_messages: AtomicU64,
}

impl MqttMessagingSkeleton {
    pub fn new(
        config: MqttConfig,
        client: Arc<dyn MqttClient>,
        router: Arc<dyn MessageRouter>,
        codec: Arc<dyn MessageCodec>,
        observer: Arc<MessageInProgressObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = InFlightLedger::new(
            config.max_incoming_requests,
            config.repeated_message_ignore_period,
        );
        Ok(Self {
            config,
            client,
            router,
            codec,
            observer,
            preprocessor: Arc::new(NoOpRawMessagePreprocessor),
            status_receiver: Arc::new(NoOpStatusReceiver),
            ledger: Mutex::new(ledger),
            multicast_topics: Mutex::new(HashMap::new()),
            dropped_messages: AtomicU64::new(0),
        })
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn RawMessagePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_status_receiver(mut self, status_receiver: Arc<dyn MqttStatusReceiver>) -> Self {
        self.status_receiver = status_receiver;
        self
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Subscribe to the own topic and register for completion and flush
    /// notifications
    pub fn init(self: &Arc<Self>) -> Result<()> {
        let listener: Arc<dyn MessageProcessedListener> = self.clone();
        self.router.register_message_processed_listener(listener);
        let outstanding: Arc<dyn OutstandingPublishes> = self.clone();
        self.observer.register_skeleton(&outstanding);

        let own = topic::own_subscription_topic(&self.config.own_topic);
        debug!("subscribing to {}", own);
        self.client.subscribe(&own)
    }

    /// Handle one raw inbound publish
    ///
    /// `on_failure` runs when the message cannot be decoded or routed; such
    /// messages are acknowledged immediately. Messages dropped for capacity
    /// stay unacknowledged so the broker redelivers them.
    pub fn transmit<F>(&self, raw: Bytes, transport_message_id: u32, qos: u8, on_failure: F)
    where
        F: FnOnce(MqttError),
    {
        let ack = AckHandle {
            transport_message_id,
            qos,
        };
        let raw = self.preprocessor.process(raw);
        let message = match self.codec.decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                error!("unable to decode inbound message {}: {}", transport_message_id, e);
                self.acknowledge(ack);
                on_failure(e.into());
                return;
            }
        };

        let message_id = message.id.clone();
        let bounded = message.message_type().is_request();
        let admission = self
            .ledger
            .lock()
            .admit(&message_id, ack, bounded, Instant::now());
        match admission {
            Admission::Accepted => {}
            Admission::Full => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "dropping {:?} message {}: {} messages in flight (dropped so far: {})",
                    message.message_type(),
                    message_id,
                    self.config.max_incoming_requests,
                    dropped
                );
                self.status_receiver.notify_message_dropped();
                return;
            }
            Admission::Duplicate => {
                debug!("dropping duplicate message {}", message_id);
                return;
            }
        }

        let ack_allowed = self.observer.can_message_be_acknowledged(&message_id);
        if !ack_allowed {
            self.ledger.lock().set_ack_allowed(&message_id, false);
        }

        trace!(
            "routing {:?} message {} from {}",
            message.message_type(),
            message_id,
            message.sender
        );
        if let Err(e) = self.router.route(message) {
            error!("routing message {} failed: {}", message_id, e);
            let forgotten = self.ledger.lock().forget(&message_id);
            self.observer.decrement_messages_in_progress(&message_id);
            if let Some(ack) = forgotten {
                self.acknowledge(ack);
            }
            on_failure(MqttError::Routing(e.to_string()));
        }
    }

    /// Subscribe to a multicast topic; repeated registrations share one
    /// broker subscription
    pub fn register_multicast_subscription(&self, multicast_id: &str) -> Result<()> {
        let topic = topic::multicast_topic(&self.config.multicast_topic_prefix, multicast_id);
        let first = {
            let mut topics = self.multicast_topics.lock();
            let count = topics.entry(topic.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if !first {
            trace!("multicast topic {} already subscribed", topic);
            return Ok(());
        }

        debug!("subscribing to multicast topic {}", topic);
        if let Err(e) = self.client.subscribe(&topic) {
            self.release_topic(&topic);
            return Err(e);
        }
        Ok(())
    }

    pub fn unregister_multicast_subscription(&self, multicast_id: &str) -> Result<()> {
        let topic = topic::multicast_topic(&self.config.multicast_topic_prefix, multicast_id);
        match self.release_topic(&topic) {
            Some(0) => {
                debug!("unsubscribing from multicast topic {}", topic);
                self.client.unsubscribe(&topic)
            }
            Some(_) => Ok(()),
            None => {
                debug!("multicast topic {} was not subscribed", topic);
                Ok(())
            }
        }
    }

    /// Remaining references to `topic`, `None` if it was unknown
    fn release_topic(&self, topic: &str) -> Option<usize> {
        let mut topics = self.multicast_topics.lock();
        let count = topics.get_mut(topic)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            topics.remove(topic);
        }
        Some(remaining)
    }

    pub fn dropped_messages_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Messages admitted and not yet processed
    pub fn messages_in_flight(&self) -> usize {
        self.ledger.lock().in_flight()
    }

    /// Acknowledgements held back by backpressure
    pub fn deferred_acknowledgements(&self) -> usize {
        self.ledger.lock().outstanding_len()
    }

    fn acknowledge(&self, ack: AckHandle) {
        if ack.qos == 0 {
            return;
        }
        trace!("acknowledging publish {}", ack.transport_message_id);
        self.client.acknowledge(ack.transport_message_id, ack.qos);
    }

    fn flush_outstanding(&self) {
        let outstanding = self.ledger.lock().take_outstanding();
        if !outstanding.is_empty() {
            debug!("acknowledging {} deferred publish(es)", outstanding.len());
        }
        for ack in outstanding {
            self.acknowledge(ack);
        }
    }
}

impl MessageProcessedListener for MqttMessagingSkeleton {
    fn message_processed(&self, message_id: &str) {
        let completion = self.ledger.lock().complete(message_id, Instant::now());
        let Some(completion) = completion else {
            trace!("message {} not tracked by this skeleton", message_id);
            return;
        };

        self.observer.decrement_messages_in_progress(message_id);
        if completion.ack_allowed || !self.observer.is_engaged() {
            self.acknowledge(completion.ack);
            return;
        }

        trace!("deferring acknowledgement of {}", message_id);
        self.ledger.lock().defer(completion.ack);
        // a disengage between the check above and the deferral would strand it
        if !self.observer.is_engaged() {
            self.flush_outstanding();
        }
    }
}

impl OutstandingPublishes for MqttMessagingSkeleton {
    fn acknowledge_outstanding_publishes(&self) {
        self.flush_outstanding();
    }
}

impl MulticastReceiverRegistrar for MqttMessagingSkeleton {
    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        _subscriber: &ParticipantId,
        _provider: &ParticipantId,
    ) -> interlink::Result<()> {
        self.register_multicast_subscription(multicast_id)
            .map_err(|e| interlink::Error::Transport(e.to_string()))
    }

    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        _subscriber: &ParticipantId,
        _provider: &ParticipantId,
    ) -> interlink::Result<()> {
        self.unregister_multicast_subscription(multicast_id)
            .map_err(|e| interlink::Error::Transport(e.to_string()))
    }
}
