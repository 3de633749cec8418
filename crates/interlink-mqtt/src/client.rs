//! Collaborators of the skeleton on the broker side

use bytes::Bytes;
use crate::error::Result;

/// Broker connection as seen by the receiving skeleton
pub trait MqttClient: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<()>;

    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Acknowledge an inbound publish; QoS 0 publishes need no acknowledgement
    fn acknowledge(&self, transport_message_id: u32, qos: u8);
}

/// Connection status sink
pub trait MqttStatusReceiver: Send + Sync {
    /// An inbound message was dropped because the skeleton was full
    fn notify_message_dropped(&self);
}

/// Status receiver that ignores every notification
#[derive(Debug, Default)]
pub struct NoOpStatusReceiver;

impl MqttStatusReceiver for NoOpStatusReceiver {
    fn notify_message_dropped(&self) {}
}

/// Hook applied to raw payloads before they are decoded
pub trait RawMessagePreprocessor: Send + Sync {
    fn process(&self, raw: Bytes) -> Bytes;
}

#[derive(Debug, Default)]
pub struct NoOpRawMessagePreprocessor;

impl RawMessagePreprocessor for NoOpRawMessagePreprocessor {
    fn process(&self, raw: Bytes) -> Bytes {
        raw
    }
}
