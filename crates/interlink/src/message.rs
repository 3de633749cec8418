//! Message model
//!
//! Every exchange between a proxy and a provider is a [`Message`]: a routing
//! header (id, sender, recipient, absolute expiry, custom headers) followed by
//! one typed [`Payload`].
//!
//! ```text
//! Request ──────────────▶ provider          SubscriptionRequest ─────▶ provider
//!         ◀────────────── Reply                                 ◀───── SubscriptionReply
//! OneWay  ──────────────▶ provider (no reply)                   ◀───── Publication*
//!                                           SubscriptionStop ────────▶ provider
//! ```
//!
//! Argument and response payloads are opaque byte strings produced by the
//! generated proxy/provider code.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use bytes::Bytes;
use crate::error::ApplicationError;
use crate::types::ParticipantId;

/// Milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute expiry for a TTL starting now
pub fn expiry_from_ttl(ttl: Duration) -> u64 {
    now_ms().saturating_add(ttl.as_millis().min(u128::from(u64::MAX)) as u64)
}

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Reply = 1,
    OneWay = 2,
    SubscriptionRequest = 3,
    BroadcastSubscriptionRequest = 4,
    MulticastSubscriptionRequest = 5,
    SubscriptionReply = 6,
    SubscriptionStop = 7,
    Publication = 8,
    Multicast = 9,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            1 => Some(Self::Reply),
            2 => Some(Self::OneWay),
            3 => Some(Self::SubscriptionRequest),
            4 => Some(Self::BroadcastSubscriptionRequest),
            5 => Some(Self::MulticastSubscriptionRequest),
            6 => Some(Self::SubscriptionReply),
            7 => Some(Self::SubscriptionStop),
            8 => Some(Self::Publication),
            9 => Some(Self::Multicast),
            _ => None,
        }
    }

    /// Request-like messages that make a provider do work
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request | Self::OneWay)
    }
}

/// Method invocation expecting a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_reply_id: String,
    pub method_name: String,
    pub param_datatypes: Vec<String>,
    pub params: Bytes,
    /// Set for stateless async calls so the reply names the completed method
    pub stateless_method_id: Option<String>,
}

/// Fire-and-forget method invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneWayRequest {
    pub method_name: String,
    pub param_datatypes: Vec<String>,
    pub params: Bytes,
}

/// Result carried by a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Successful return value
    Response(Bytes),
    /// Error modeled by the interface contract
    ApplicationError(ApplicationError),
    /// Generic provider-side failure
    Failure(String),
}

/// Reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub request_reply_id: String,
    pub stateless_method_id: Option<String>,
    /// Message ID of the request, echoed for stateless callers
    pub request_message_id: Option<String>,
    pub outcome: ReplyOutcome,
}

impl Reply {
    pub fn response(request_reply_id: impl Into<String>, response: Bytes) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            stateless_method_id: None,
            request_message_id: None,
            outcome: ReplyOutcome::Response(response),
        }
    }

    pub fn application_error(request_reply_id: impl Into<String>, error: ApplicationError) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            stateless_method_id: None,
            request_message_id: None,
            outcome: ReplyOutcome::ApplicationError(error),
        }
    }

    pub fn failure(request_reply_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            stateless_method_id: None,
            request_message_id: None,
            outcome: ReplyOutcome::Failure(reason.into()),
        }
    }

    /// Build the reply for a request, copying its correlation fields
    pub fn to_request(request: &Request, outcome: ReplyOutcome) -> Self {
        Self {
            request_reply_id: request.request_reply_id.clone(),
            stateless_method_id: request.stateless_method_id.clone(),
            request_message_id: None,
            outcome,
        }
    }

    /// Echo the ID of the request message the reply answers
    pub fn with_request_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.request_message_id = Some(message_id.into());
        self
    }
}

/// Subscription quality of service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionQos {
    /// Minimum interval between publications
    pub min_interval: Duration,
    /// Absolute expiry in unix milliseconds; `None` never expires
    pub expiry_ms: Option<u64>,
    /// Alert the listener when no publication arrived within this interval
    pub alert_after_interval: Option<Duration>,
    /// TTL of each publication message
    pub publication_ttl: Duration,
}

impl SubscriptionQos {
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.expiry_ms = Some(expiry_from_ttl(validity));
        self
    }

    pub fn with_alert_after(mut self, interval: Duration) -> Self {
        self.alert_after_interval = Some(interval);
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_publication_ttl(mut self, ttl: Duration) -> Self {
        self.publication_ttl = ttl;
        self
    }
}

/// Kind-specific part of a subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionVariant {
    Attribute,
    Broadcast {
        filter_parameters: BTreeMap<String, String>,
    },
    Multicast {
        multicast_id: String,
        partitions: Vec<String>,
    },
}

/// Request to start publications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    /// Attribute or broadcast name
    pub name: String,
    pub qos: SubscriptionQos,
    pub variant: SubscriptionVariant,
}

/// Provider confirmation (or rejection) of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReply {
    pub subscription_id: String,
    pub error: Option<String>,
}

/// Request to stop publications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStop {
    pub subscription_id: String,
}

/// Attribute value or broadcast values for one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub subscription_id: String,
    pub value: std::result::Result<Bytes, String>,
}

/// Broadcast values published to every matching multicast subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastPublication {
    pub multicast_id: String,
    pub values: Bytes,
}

/// Typed message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Request(Request),
    OneWay(OneWayRequest),
    Reply(Reply),
    SubscriptionRequest(SubscriptionRequest),
    SubscriptionReply(SubscriptionReply),
    SubscriptionStop(SubscriptionStop),
    Publication(Publication),
    Multicast(MulticastPublication),
}

/// One routable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Globally unique message ID
    pub id: String,
    pub sender: ParticipantId,
    /// Recipient participant ID, or the multicast ID of a multicast publication
    pub recipient: String,
    /// Absolute expiry in unix milliseconds
    pub expiry_ms: u64,
    pub headers: BTreeMap<String, String>,
    pub payload: Payload,
}

impl Message {
    /// Create a message with a fresh ID that expires `ttl` from now
    pub fn new(
        sender: ParticipantId,
        recipient: impl Into<String>,
        ttl: Duration,
        payload: Payload,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            recipient: recipient.into(),
            expiry_ms: expiry_from_ttl(ttl),
            headers: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            Payload::Request(_) => MessageType::Request,
            Payload::OneWay(_) => MessageType::OneWay,
            Payload::Reply(_) => MessageType::Reply,
            Payload::SubscriptionRequest(request) => match request.variant {
                SubscriptionVariant::Attribute => MessageType::SubscriptionRequest,
                SubscriptionVariant::Broadcast { .. } => MessageType::BroadcastSubscriptionRequest,
                SubscriptionVariant::Multicast { .. } => MessageType::MulticastSubscriptionRequest,
            },
            Payload::SubscriptionReply(_) => MessageType::SubscriptionReply,
            Payload::SubscriptionStop(_) => MessageType::SubscriptionStop,
            Payload::Publication(_) => MessageType::Publication,
            Payload::Multicast(_) => MessageType::Multicast,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_ms <= now_ms()
    }
}
