//! Consumer-side inbound routing
//!
//! Hands replies to the correlation directory and subscription traffic to the
//! subscription manager. Provider-bound message types are not accepted here.

use std::sync::Arc;
use tracing::{debug, trace};
use crate::codec::MessageCodec;
use crate::correlation::ReplyCallerDirectory;
use crate::error::{Error, Result};
use crate::message::{Message, Payload};
use crate::subscription::SubscriptionManager;
use crate::transport::MessageSender;

/// What became of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Handed to a pending call, callback or listener
    Delivered,
    /// Nobody waited for it (late reply, unknown subscription)
    Unclaimed,
    /// Dropped because its expiry passed
    Expired,
}

pub struct MessageReceiver {
    directory: Arc<ReplyCallerDirectory>,
    subscriptions: Arc<SubscriptionManager>,
}

impl MessageReceiver {
    pub fn new(directory: Arc<ReplyCallerDirectory>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            directory,
            subscriptions,
        }
    }

    /// Route one decoded message
    pub fn receive(&self, message: Message) -> Result<Routed> {
        if message.is_expired() {
            debug!(
                "dropping expired {:?} message {} from {}",
                message.message_type(),
                message.id,
                message.sender
            );
            return Ok(Routed::Expired);
        }
        trace!("inbound {:?} message {}", message.message_type(), message.id);

        let delivered = match message.payload {
            Payload::Reply(reply) => self.directory.resolve_reply(reply),
            Payload::SubscriptionReply(reply) => self.subscriptions.handle_subscription_reply(reply),
            Payload::Publication(publication) => self.subscriptions.handle_publication(publication),
            Payload::Multicast(publication) => {
                self.subscriptions.handle_multicast_publication(publication) > 0
            }
            Payload::Request(_)
            | Payload::OneWay(_)
            | Payload::SubscriptionRequest(_)
            | Payload::SubscriptionStop(_) => {
                return Err(Error::IllegalState(format!(
                    "message {} is addressed to a provider",
                    message.id
                )))
            }
        };

        Ok(if delivered {
            Routed::Delivered
        } else {
            Routed::Unclaimed
        })
    }

    /// Decode and route a raw frame
    pub fn receive_bytes(&self, codec: &dyn MessageCodec, data: &[u8]) -> Result<Routed> {
        self.receive(codec.decode(data)?)
    }
}

/// Lets a receiver terminate an in-process transport
impl MessageSender for MessageReceiver {
    fn send(&self, message: Message) -> Result<()> {
        self.receive(message).map(|_| ())
    }
}
