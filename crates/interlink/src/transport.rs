//! Transport-agnostic seams
//!
//! The dispatcher and subscription manager only need a way to hand a message
//! to the outbound path. The inbound transport skeletons need a router to pass
//! decoded messages to, plus a completion notification back from it.

use std::sync::Arc;
use crate::error::Result;
use crate::message::Message;

/// Outbound send operation
pub trait MessageSender: Send + Sync {
    /// Queue a message for delivery to its recipient
    fn send(&self, message: Message) -> Result<()>;
}

/// Completion notification of the message router
pub trait MessageProcessedListener: Send + Sync {
    /// Called once the router is done with the message
    fn message_processed(&self, message_id: &str);
}

/// Generic message router consumed by inbound transport skeletons
pub trait MessageRouter: Send + Sync {
    /// Route a decoded inbound message
    fn route(&self, message: Message) -> Result<()>;

    /// Register for `message_processed` callbacks
    fn register_message_processed_listener(&self, listener: Arc<dyn MessageProcessedListener>);
}

impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    fn send(&self, message: Message) -> Result<()> {
        (**self).send(message)
    }
}
