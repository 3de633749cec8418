//! Discovery collaborator and proxy-side arbitration
//!
//! The arbitrator resolves `{domains, interface}` to a provider set. An
//! [`ArbitratedProxy`] resolves once, caches the result and forwards calls to
//! the dispatcher and subscription manager with the cached targets.
//!
//! `Discovery` failures (nothing registered yet) are retried every retry
//! interval until the discovery timeout; `NoCompatibleProvider` (version
//! mismatch) is returned at once.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};
use crate::config::MessagingConfig;
use crate::correlation::ReplyCallback;
use crate::dispatcher::{InvocationDispatcher, ReplyFuture};
use crate::error::{Error, Result};
use crate::method::MethodDescriptor;
use crate::subscription::{
    AttributeSubscribeInvocation, BroadcastSubscribeInvocation, MulticastSubscribeInvocation,
    SubscriptionFuture, SubscriptionManager, UnsubscribeInvocation,
};
use crate::types::{MessagingQos, ResolvedTargets};

/// Arbitration settings of one proxy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryQos {
    /// Overall time budget; the configured default when unset
    pub discovery_timeout: Option<Duration>,
    /// Pause between attempts; the configured default when unset
    pub retry_interval: Option<Duration>,
}

impl DiscoveryQos {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }
}

/// Discovery/arbitration collaborator
#[async_trait]
pub trait Arbitrator: Send + Sync {
    /// Resolve the providers of `interface_name` in `domains`
    ///
    /// Fails with [`Error::Discovery`] when no provider is registered and
    /// [`Error::NoCompatibleProvider`] on a version mismatch.
    async fn resolve(
        &self,
        domains: &[String],
        interface_name: &str,
        qos: &DiscoveryQos,
    ) -> Result<ResolvedTargets>;
}

/// Proxy bound to an interface in a set of domains
pub struct ArbitratedProxy {
    domains: Vec<String>,
    interface_name: String,
    discovery_qos: DiscoveryQos,
    messaging_qos: MessagingQos,
    arbitrator: Arc<dyn Arbitrator>,
    dispatcher: Arc<InvocationDispatcher>,
    subscriptions: Arc<SubscriptionManager>,
    config: MessagingConfig,
    targets: OnceCell<ResolvedTargets>,
}

impl ArbitratedProxy {
    pub fn new(
        domains: Vec<String>,
        interface_name: impl Into<String>,
        arbitrator: Arc<dyn Arbitrator>,
        dispatcher: Arc<InvocationDispatcher>,
        subscriptions: Arc<SubscriptionManager>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            domains,
            interface_name: interface_name.into(),
            discovery_qos: DiscoveryQos::default(),
            messaging_qos: MessagingQos::default(),
            arbitrator,
            dispatcher,
            subscriptions,
            config,
            targets: OnceCell::new(),
        }
    }

    pub fn with_discovery_qos(mut self, qos: DiscoveryQos) -> Self {
        self.discovery_qos = qos;
        self
    }

    pub fn with_messaging_qos(mut self, qos: MessagingQos) -> Self {
        self.messaging_qos = qos;
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Resolved providers, arbitrating on first use
    pub async fn targets(&self) -> Result<&ResolvedTargets> {
        self.targets.get_or_try_init(|| self.arbitrate()).await
    }

    async fn arbitrate(&self) -> Result<ResolvedTargets> {
        let timeout = self
            .discovery_qos
            .discovery_timeout
            .unwrap_or(self.config.discovery_timeout);
        let retry_interval = self
            .discovery_qos
            .retry_interval
            .unwrap_or(self.config.discovery_retry_interval);
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self
                .arbitrator
                .resolve(&self.domains, &self.interface_name, &self.discovery_qos)
                .await
                .and_then(|targets| {
                    if targets.is_empty() {
                        Err(Error::Discovery(format!(
                            "no provider for {} in {:?}",
                            self.interface_name, self.domains
                        )))
                    } else {
                        Ok(targets)
                    }
                });

            match result {
                Ok(targets) => {
                    debug!(
                        "arbitration for {} in {:?} found {} provider(s) after {} attempt(s)",
                        self.interface_name,
                        self.domains,
                        targets.len(),
                        attempt
                    );
                    return Ok(targets);
                }
                Err(Error::Discovery(reason)) => {
                    if Instant::now() + retry_interval > deadline {
                        warn!(
                            "arbitration for {} gave up after {} attempt(s): {}",
                            self.interface_name, attempt, reason
                        );
                        return Err(Error::Discovery(reason));
                    }
                    debug!(
                        "arbitration attempt {} for {} failed: {}, retrying in {:?}",
                        attempt, self.interface_name, reason, retry_interval
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn call_one_way(&self, method: &MethodDescriptor, params: Bytes) -> Result<()> {
        let targets = self.targets().await?;
        self.dispatcher
            .call_one_way(method, params, targets, &self.messaging_qos)
    }

    pub async fn call_async(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<ReplyFuture> {
        let targets = self.targets().await?;
        self.dispatcher
            .call_async(method, params, targets, &self.messaging_qos, callback)
    }

    pub async fn subscribe_to_attribute(
        &self,
        invocation: AttributeSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        let targets = self.targets().await?;
        self.subscriptions.register_attribute_subscription(
            self.dispatcher.participant_id(),
            targets,
            invocation,
        )
    }

    pub async fn subscribe_to_broadcast(
        &self,
        invocation: BroadcastSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        let targets = self.targets().await?;
        self.subscriptions.register_broadcast_subscription(
            self.dispatcher.participant_id(),
            targets,
            invocation,
        )
    }

    pub async fn subscribe_to_multicast(
        &self,
        invocation: MulticastSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        let targets = self.targets().await?;
        self.subscriptions.register_multicast_subscription(
            self.dispatcher.participant_id(),
            targets,
            invocation,
        )
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let targets = self.targets().await?;
        self.subscriptions.unregister_subscription(
            self.dispatcher.participant_id(),
            targets,
            UnsubscribeInvocation::new(subscription_id),
        )
    }
}
