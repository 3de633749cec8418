//! Ordered listener delivery
//!
//! Every subscription owns one queue drained by one task, so its listener
//! sees events in arrival order and never on the network receive thread.
//! Distinct subscriptions are delivered independently.

use std::sync::Arc;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::trace;
use crate::error::Error;
use super::SubscriptionListener;

/// Event queued for a listener
#[derive(Debug)]
pub(crate) enum Delivery {
    Subscribed(String),
    Value(Bytes),
    Error(Error),
}

/// Sending half of a subscription's delivery queue
///
/// The worker stops once every clone of the queue is dropped.
#[derive(Clone)]
pub(crate) struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryQueue {
    pub(crate) fn spawn(
        runtime: &Handle,
        subscription_id: String,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Delivery::Subscribed(id) => listener.on_subscribed(&id),
                    Delivery::Value(value) => listener.on_receive(value),
                    Delivery::Error(error) => listener.on_error(&error),
                }
            }
            trace!("delivery worker for subscription {} stopped", subscription_id);
        });

        Self { tx }
    }

    /// Queue an event; `false` once the worker is gone
    pub(crate) fn push(&self, event: Delivery) -> bool {
        self.tx.send(event).is_ok()
    }
}
