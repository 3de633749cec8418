//! Subscription manager
//!
//! Keeps one record per subscription ID: its kind, targets, listener queue,
//! pending confirmation and QoS timers. Registration installs the record
//! before any request leaves, so early replies and publications find it.
//!
//! The record table sits behind one mutex that is never held while sending
//! or calling the multicast registrar.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use crate::config::MessagingConfig;
use crate::error::{Error, Result};
use crate::message::{
    now_ms, Message, MulticastPublication, Payload, Publication, SubscriptionQos,
    SubscriptionReply, SubscriptionRequest, SubscriptionStop, SubscriptionVariant,
};
use crate::transport::MessageSender;
use crate::types::{ParticipantId, ResolvedTargets};
use super::delivery::{Delivery, DeliveryQueue};
use super::multicast::{self, MulticastPattern, MulticastReceiverRegistrar};
use super::{
    AttributeSubscribeInvocation, BroadcastSubscribeInvocation, MulticastSubscribeInvocation,
    SubscriptionFuture, SubscriptionKind, SubscriptionListener, UnsubscribeInvocation,
};

type SubscriptionTable = Mutex<HashMap<String, SubscriptionEntry>>;

/// Multicast receiver installed for one provider
#[derive(Debug, Clone)]
struct MulticastReceiver {
    pattern: MulticastPattern,
    provider: ParticipantId,
}

struct SubscriptionEntry {
    kind: SubscriptionKind,
    subscriber: ParticipantId,
    targets: ResolvedTargets,
    receivers: Vec<MulticastReceiver>,
    queue: DeliveryQueue,
    confirmation: Option<oneshot::Sender<Result<String>>>,
    last_publication: Arc<Mutex<Instant>>,
    timers: Vec<JoinHandle<()>>,
}

impl Drop for SubscriptionEntry {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

/// Kind-specific registration input
enum Registration {
    Attribute,
    Broadcast(std::collections::BTreeMap<String, String>),
    Multicast(Vec<String>),
}

/// Consumer-side subscription registry
pub struct SubscriptionManager {
    sender: Arc<dyn MessageSender>,
    registrar: Option<Arc<dyn MulticastReceiverRegistrar>>,
    config: MessagingConfig,
    subscriptions: Arc<SubscriptionTable>,
}

impl SubscriptionManager {
    pub fn new(sender: Arc<dyn MessageSender>, config: MessagingConfig) -> Self {
        Self {
            sender,
            registrar: None,
            config,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Install the collaborator wiring multicast publications to subscribers
    pub fn with_multicast_registrar(mut self, registrar: Arc<dyn MulticastReceiverRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn register_attribute_subscription(
        &self,
        from: &ParticipantId,
        targets: &ResolvedTargets,
        invocation: AttributeSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        self.register(
            from,
            targets,
            invocation.subscription_id,
            invocation.attribute_name,
            invocation.qos,
            invocation.listener,
            Registration::Attribute,
        )
    }

    pub fn register_broadcast_subscription(
        &self,
        from: &ParticipantId,
        targets: &ResolvedTargets,
        invocation: BroadcastSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        self.register(
            from,
            targets,
            invocation.subscription_id,
            invocation.broadcast_name,
            invocation.qos,
            invocation.listener,
            Registration::Broadcast(invocation.filter_parameters),
        )
    }

    pub fn register_multicast_subscription(
        &self,
        from: &ParticipantId,
        targets: &ResolvedTargets,
        invocation: MulticastSubscribeInvocation,
    ) -> Result<SubscriptionFuture> {
        multicast::validate_partitions(&invocation.partitions)?;
        self.register(
            from,
            targets,
            invocation.subscription_id,
            invocation.broadcast_name,
            invocation.qos,
            invocation.listener,
            Registration::Multicast(invocation.partitions),
        )
    }

    /// Stop a subscription at every target
    ///
    /// Local state is dropped first; a stop is sent to each target even when
    /// the ID is unknown locally. The first send failure is returned after all
    /// targets were tried.
    pub fn unregister_subscription(
        &self,
        from: &ParticipantId,
        targets: &ResolvedTargets,
        invocation: UnsubscribeInvocation,
    ) -> Result<()> {
        let subscription_id = invocation.subscription_id;
        targets.require_any(&subscription_id)?;

        let removed = self.subscriptions.lock().remove(&subscription_id);
        match removed {
            Some(entry) => self.remove_receivers(&entry.subscriber, &entry.receivers),
            None => debug!(
                "unregister of unknown subscription {}, sending stop anyway",
                subscription_id
            ),
        }

        let ttl = self.config.effective_ttl(invocation.ttl);
        let mut result = Ok(());
        for target in targets.iter() {
            let message = Message::new(
                from.clone(),
                target.participant_id.as_str(),
                ttl,
                Payload::SubscriptionStop(SubscriptionStop {
                    subscription_id: subscription_id.clone(),
                }),
            );
            debug!(
                "SUBSCRIPTION STOP call proxy: subscriptionId: {}, messageId: {}, from: {}, to: {}",
                subscription_id, message.id, from, target.participant_id
            );
            if let Err(e) = self.sender.send(message) {
                warn!(
                    "failed to send subscription stop {} to {}: {}",
                    subscription_id, target.participant_id, e
                );
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Route a provider's subscription reply
    pub fn handle_subscription_reply(&self, reply: SubscriptionReply) -> bool {
        let subscription_id = reply.subscription_id;
        match reply.error {
            None => {
                let (confirmation, queue) = {
                    let mut subscriptions = self.subscriptions.lock();
                    let Some(entry) = subscriptions.get_mut(&subscription_id) else {
                        debug!("subscription reply for unknown subscription {}", subscription_id);
                        return false;
                    };
                    (entry.confirmation.take(), entry.queue.clone())
                };
                // only the first reply confirms
                if let Some(confirmation) = confirmation {
                    trace!("subscription {} confirmed", subscription_id);
                    let _ = confirmation.send(Ok(subscription_id.clone()));
                    queue.push(Delivery::Subscribed(subscription_id));
                }
                true
            }
            Some(reason) => {
                let removed = self.subscriptions.lock().remove(&subscription_id);
                let Some(mut entry) = removed else {
                    debug!("subscription error for unknown subscription {}: {}", subscription_id, reason);
                    return false;
                };
                warn!("subscription {} rejected: {}", subscription_id, reason);
                self.remove_receivers(&entry.subscriber, &entry.receivers);
                let error = Error::Runtime(reason);
                if let Some(confirmation) = entry.confirmation.take() {
                    let _ = confirmation.send(Err(error.clone()));
                }
                entry.queue.push(Delivery::Error(error));
                true
            }
        }
    }

    /// Route an attribute or selective broadcast publication
    pub fn handle_publication(&self, publication: Publication) -> bool {
        let queue = {
            let subscriptions = self.subscriptions.lock();
            let Some(entry) = subscriptions.get(&publication.subscription_id) else {
                debug!(
                    "publication for unknown subscription {} dropped",
                    publication.subscription_id
                );
                return false;
            };
            *entry.last_publication.lock() = Instant::now();
            entry.queue.clone()
        };
        match publication.value {
            Ok(value) => queue.push(Delivery::Value(value)),
            Err(reason) => queue.push(Delivery::Error(Error::Runtime(reason))),
        }
    }

    /// Route a multicast publication to every matching subscription
    ///
    /// Returns the number of subscriptions it was delivered to.
    pub fn handle_multicast_publication(&self, publication: MulticastPublication) -> usize {
        let queues: Vec<DeliveryQueue> = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .values()
                .filter(|entry| {
                    entry
                        .receivers
                        .iter()
                        .any(|r| r.pattern.matches(&publication.multicast_id))
                })
                .map(|entry| {
                    *entry.last_publication.lock() = Instant::now();
                    entry.queue.clone()
                })
                .collect()
        };
        if queues.is_empty() {
            debug!("no subscriber for multicast {}", publication.multicast_id);
        }
        queues
            .iter()
            .filter(|queue| queue.push(Delivery::Value(publication.values.clone())))
            .count()
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().contains_key(subscription_id)
    }

    pub fn kind_of(&self, subscription_id: &str) -> Option<SubscriptionKind> {
        self.subscriptions.lock().get(subscription_id).map(|e| e.kind)
    }

    /// Providers a subscription was registered with
    pub fn targets_of(&self, subscription_id: &str) -> Option<ResolvedTargets> {
        self.subscriptions
            .lock()
            .get(subscription_id)
            .map(|e| e.targets.clone())
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        from: &ParticipantId,
        targets: &ResolvedTargets,
        subscription_id: Option<String>,
        name: String,
        qos: SubscriptionQos,
        listener: Arc<dyn SubscriptionListener>,
        registration: Registration,
    ) -> Result<SubscriptionFuture> {
        targets.require_any(&name)?;
        let runtime = Handle::try_current().map_err(|_| {
            Error::IllegalState("subscriptions need a tokio runtime".to_string())
        })?;
        let subscription_id = subscription_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ttl = self.subscription_ttl(&subscription_id, &qos)?;

        let kind = match registration {
            Registration::Attribute => SubscriptionKind::Attribute,
            Registration::Broadcast(_) => SubscriptionKind::Broadcast,
            Registration::Multicast(_) => SubscriptionKind::Multicast,
        };

        let receivers: Vec<MulticastReceiver> = match &registration {
            Registration::Multicast(partitions) => targets
                .iter()
                .map(|target| MulticastReceiver {
                    pattern: MulticastPattern::new(multicast::multicast_id(
                        &target.participant_id,
                        &name,
                        partitions,
                    )),
                    provider: target.participant_id.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        self.add_receivers(from, &receivers)?;

        let queue = DeliveryQueue::spawn(&runtime, subscription_id.clone(), listener);
        let (confirmation, confirmed) = oneshot::channel();
        let last_publication = Arc::new(Mutex::new(Instant::now()));
        let timers = self.start_qos_timers(&runtime, &subscription_id, &qos, &queue, &last_publication);

        let entry = SubscriptionEntry {
            kind,
            subscriber: from.clone(),
            targets: targets.clone(),
            receivers: receivers.clone(),
            queue,
            confirmation: Some(confirmation),
            last_publication,
            timers,
        };
        let replaced = self
            .subscriptions
            .lock()
            .insert(subscription_id.clone(), entry);
        if let Some(previous) = replaced {
            debug!("subscription {} replaced", subscription_id);
            let stale: Vec<MulticastReceiver> = previous
                .receivers
                .iter()
                .filter(|old| !receivers.iter().any(|new| new.pattern == old.pattern))
                .cloned()
                .collect();
            self.remove_receivers(&previous.subscriber, &stale);
        }

        for (index, target) in targets.iter().enumerate() {
            let variant = match &registration {
                Registration::Attribute => SubscriptionVariant::Attribute,
                Registration::Broadcast(filter_parameters) => SubscriptionVariant::Broadcast {
                    filter_parameters: filter_parameters.clone(),
                },
                Registration::Multicast(partitions) => SubscriptionVariant::Multicast {
                    multicast_id: receivers[index].pattern.id().to_string(),
                    partitions: partitions.clone(),
                },
            };
            let message = Message::new(
                from.clone(),
                target.participant_id.as_str(),
                ttl,
                Payload::SubscriptionRequest(SubscriptionRequest {
                    subscription_id: subscription_id.clone(),
                    name: name.clone(),
                    qos: qos.clone(),
                    variant,
                }),
            );
            debug!(
                "SUBSCRIPTION call proxy: subscriptionId: {}, kind: {:?}, name: {}, messageId: {}, from: {}, to: {}",
                subscription_id, kind, name, message.id, from, target.participant_id
            );
            if let Err(e) = self.sender.send(message) {
                let removed = self.subscriptions.lock().remove(&subscription_id);
                if let Some(entry) = removed {
                    self.remove_receivers(&entry.subscriber, &entry.receivers);
                }
                return Err(e);
            }
        }

        Ok(SubscriptionFuture::new(subscription_id, confirmed))
    }

    /// Messaging TTL of a subscription request
    fn subscription_ttl(&self, subscription_id: &str, qos: &SubscriptionQos) -> Result<Duration> {
        match qos.expiry_ms {
            None => Ok(self.config.max_ttl),
            Some(expiry) => {
                let now = now_ms();
                if expiry <= now {
                    return Err(Error::SubscriptionExpired(subscription_id.to_string()));
                }
                Ok(Duration::from_millis(expiry - now).min(self.config.max_ttl))
            }
        }
    }

    fn start_qos_timers(
        &self,
        runtime: &Handle,
        subscription_id: &str,
        qos: &SubscriptionQos,
        queue: &DeliveryQueue,
        last_publication: &Arc<Mutex<Instant>>,
    ) -> Vec<JoinHandle<()>> {
        let mut timers = Vec::new();

        if let Some(expiry) = qos.expiry_ms {
            let remaining = Duration::from_millis(expiry.saturating_sub(now_ms()));
            let table: Weak<SubscriptionTable> = Arc::downgrade(&self.subscriptions);
            let registrar = self.registrar.clone();
            let id = subscription_id.to_string();
            timers.push(runtime.spawn(async move {
                tokio::time::sleep(remaining).await;
                let Some(table) = table.upgrade() else { return };
                let removed = table.lock().remove(&id);
                if let Some(entry) = removed {
                    debug!("subscription {} expired", id);
                    if let Some(registrar) = registrar {
                        for receiver in &entry.receivers {
                            let _ = registrar.remove_multicast_receiver(
                                receiver.pattern.id(),
                                &entry.subscriber,
                                &receiver.provider,
                            );
                        }
                    }
                }
            }));
        }

        if let Some(interval) = qos.alert_after_interval.filter(|i| !i.is_zero()) {
            let queue = queue.clone();
            let last_publication = last_publication.clone();
            let id = subscription_id.to_string();
            timers.push(runtime.spawn(async move {
                let mut wait = interval;
                loop {
                    tokio::time::sleep(wait).await;
                    let elapsed = last_publication.lock().elapsed();
                    if elapsed >= interval {
                        trace!("publication missed for subscription {}", id);
                        if !queue.push(Delivery::Error(Error::PublicationMissed(id.clone()))) {
                            break;
                        }
                        wait = interval;
                    } else {
                        wait = interval - elapsed;
                    }
                }
            }));
        }

        timers
    }

    fn add_receivers(&self, subscriber: &ParticipantId, receivers: &[MulticastReceiver]) -> Result<()> {
        let Some(registrar) = &self.registrar else {
            return Ok(());
        };
        for (index, receiver) in receivers.iter().enumerate() {
            if let Err(e) =
                registrar.add_multicast_receiver(receiver.pattern.id(), subscriber, &receiver.provider)
            {
                self.remove_receivers(subscriber, &receivers[..index]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_receivers(&self, subscriber: &ParticipantId, receivers: &[MulticastReceiver]) {
        let Some(registrar) = &self.registrar else {
            return;
        };
        for receiver in receivers {
            if let Err(e) =
                registrar.remove_multicast_receiver(receiver.pattern.id(), subscriber, &receiver.provider)
            {
                warn!(
                    "failed to remove multicast receiver {}: {}",
                    receiver.pattern.id(),
                    e
                );
            }
        }
    }
}
