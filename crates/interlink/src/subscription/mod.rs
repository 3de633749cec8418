//! Subscription lifecycle
//!
//! - [`SubscriptionManager`]: registers and unregisters attribute, broadcast
//!   and multicast subscriptions and routes replies and publications back to
//!   listeners
//! - [`multicast`]: multicast IDs, partition wildcards, receiver registration
//! - `delivery`: per-subscription ordered listener queue

mod delivery;
mod manager;
pub mod multicast;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use bytes::Bytes;
use tokio::sync::oneshot;
use crate::error::{Error, Result};
use crate::message::SubscriptionQos;

pub use manager::SubscriptionManager;
pub use multicast::{MulticastPattern, MulticastReceiverRegistrar};

/// Receiver of publications
pub trait SubscriptionListener: Send + Sync {
    /// The provider confirmed the subscription
    fn on_subscribed(&self, _subscription_id: &str) {}

    /// One publication arrived
    fn on_receive(&self, value: Bytes);

    /// Provider error, rejected subscription or missed publication
    fn on_error(&self, _error: &Error) {}
}

/// Kind of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Attribute,
    Broadcast,
    Multicast,
}

/// Attribute change subscription
#[derive(Clone)]
pub struct AttributeSubscribeInvocation {
    /// Replaces an existing subscription with the same ID; generated when `None`
    pub subscription_id: Option<String>,
    pub attribute_name: String,
    pub qos: SubscriptionQos,
    pub listener: Arc<dyn SubscriptionListener>,
}

impl AttributeSubscribeInvocation {
    pub fn new(
        attribute_name: impl Into<String>,
        qos: SubscriptionQos,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Self {
        Self {
            subscription_id: None,
            attribute_name: attribute_name.into(),
            qos,
            listener,
        }
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }
}

/// Selective broadcast subscription with provider-side filter parameters
#[derive(Clone)]
pub struct BroadcastSubscribeInvocation {
    pub subscription_id: Option<String>,
    pub broadcast_name: String,
    pub filter_parameters: BTreeMap<String, String>,
    pub qos: SubscriptionQos,
    pub listener: Arc<dyn SubscriptionListener>,
}

impl BroadcastSubscribeInvocation {
    pub fn new(
        broadcast_name: impl Into<String>,
        qos: SubscriptionQos,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Self {
        Self {
            subscription_id: None,
            broadcast_name: broadcast_name.into(),
            filter_parameters: BTreeMap::new(),
            qos,
            listener,
        }
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_parameters.insert(key.into(), value.into());
        self
    }
}

/// Non-selective broadcast subscription, published by multicast
#[derive(Clone)]
pub struct MulticastSubscribeInvocation {
    pub subscription_id: Option<String>,
    pub broadcast_name: String,
    pub partitions: Vec<String>,
    pub qos: SubscriptionQos,
    pub listener: Arc<dyn SubscriptionListener>,
}

impl MulticastSubscribeInvocation {
    pub fn new(
        broadcast_name: impl Into<String>,
        qos: SubscriptionQos,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Self {
        Self {
            subscription_id: None,
            broadcast_name: broadcast_name.into(),
            partitions: Vec::new(),
            qos,
            listener,
        }
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = partitions.into_iter().map(Into::into).collect();
        self
    }
}

/// Subscription to stop
#[derive(Debug, Clone)]
pub struct UnsubscribeInvocation {
    pub subscription_id: String,
    pub ttl: Option<std::time::Duration>,
}

impl UnsubscribeInvocation {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            ttl: None,
        }
    }
}

/// Future of a subscription registration
///
/// Resolves with the subscription ID on the first positive subscription reply,
/// or with the error of a rejecting one.
#[derive(Debug)]
pub struct SubscriptionFuture {
    subscription_id: String,
    receiver: oneshot::Receiver<Result<String>>,
}

impl SubscriptionFuture {
    pub(crate) fn new(subscription_id: String, receiver: oneshot::Receiver<Result<String>>) -> Self {
        Self {
            subscription_id,
            receiver,
        }
    }

    /// ID of the subscription, available before confirmation
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }
}

impl Future for SubscriptionFuture {
    type Output = Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Runtime(format!(
                "subscription {} removed before it was confirmed",
                self.subscription_id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}
