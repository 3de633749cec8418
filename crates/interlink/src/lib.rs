//! Invocation dispatch and subscription lifecycle engine
//!
//! Turns typed proxy calls into correlated request/reply and publish/subscribe
//! exchanges between participants, independent of the transport carrying
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │              generated proxies / ArbitratedProxy              │
//! ├──────────────────────────────┬────────────────────────────────┤
//! │  InvocationDispatcher        │  SubscriptionManager           │
//! │  - one-way / sync / async    │  - attribute / broadcast /     │
//! │  - stateless async           │    multicast                   │
//! ├──────────────────────────────┤  - ordered listener delivery   │
//! │  ReplyCallerDirectory        │  - QoS expiry, missed alerts   │
//! ├──────────────────────────────┴────────────────────────────────┤
//! │  MessageSender (out)               MessageReceiver (in)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  transport bindings (in-process, MQTT, ...)                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`]: participant IDs, resolved target sets, messaging QoS
//! - [`message`]: message model
//! - [`codec`]: wire codec
//! - [`correlation`]: pending call registry
//! - [`dispatcher`]: outbound method calls
//! - [`subscription`]: subscription registry and publication routing
//! - [`inbound`]: consumer-side inbound routing
//! - [`discovery`]: arbitration collaborator and cached proxy targets
//! - [`stateless`]: deterministic stateless async IDs

pub mod codec;
pub mod config;
pub mod correlation;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod message;
pub mod method;
pub mod stateless;
pub mod subscription;
pub mod transport;
pub mod types;

pub use codec::{BinaryCodec, MessageCodec};
pub use config::MessagingConfig;
pub use correlation::{
    CallOutcome, ReplyCallback, ReplyCallerDirectory, ReplyContext, ReplyHandler, StatelessCallback,
};
pub use discovery::{ArbitratedProxy, Arbitrator, DiscoveryQos};
pub use dispatcher::{InvocationDispatcher, ReplyFuture};
pub use error::{ApplicationError, Error, Result};
pub use inbound::{MessageReceiver, Routed};
pub use message::{Message, MessageType, Payload, ReplyOutcome, SubscriptionQos};
pub use method::{MethodDescriptor, MethodKind};
pub use stateless::{StatelessAsyncIdCalculator, StatelessBinding};
pub use subscription::{
    AttributeSubscribeInvocation, BroadcastSubscribeInvocation, MulticastSubscribeInvocation,
    SubscriptionFuture, SubscriptionKind, SubscriptionListener, SubscriptionManager,
    UnsubscribeInvocation,
};
pub use transport::{MessageProcessedListener, MessageRouter, MessageSender};
pub use types::{MessagingQos, ParticipantId, ProviderEntry, ResolvedTargets, Visibility};
