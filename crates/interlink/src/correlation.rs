//! Correlation directory
//!
//! Authoritative registry of pending calls of one participant, keyed by
//! request-reply ID. Each record is resolved at most once: the first resolver
//! removes it under the lock and runs its handler after the lock is released;
//! later attempts for the same ID find nothing and are logged as late replies.
//!
//! Expired records are not swept here. The handler's own timeout logic fails
//! the caller and removes the record with [`ReplyCallerDirectory::remove`].
//!
//! Stateless callbacks live in a second table keyed by callback ID. They are
//! never consumed by a reply.

use std::collections::HashMap;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use crate::error::{Error, Result};
use crate::message::{Reply, ReplyOutcome};
use crate::stateless::StatelessAsyncIdCalculator;

/// Result delivered to a pending call
pub type CallOutcome = Result<Bytes>;

impl ReplyOutcome {
    /// Map the wire outcome onto the caller-facing error taxonomy
    pub fn into_result(self) -> CallOutcome {
        match self {
            ReplyOutcome::Response(response) => Ok(response),
            ReplyOutcome::ApplicationError(error) => Err(Error::Application(error)),
            ReplyOutcome::Failure(reason) => Err(Error::Runtime(reason)),
        }
    }
}

/// Completion object of an asynchronous call
pub trait ReplyCallback: Send {
    fn complete(self: Box<Self>, outcome: CallOutcome);
}

impl<F> ReplyCallback for F
where
    F: FnOnce(CallOutcome) + Send,
{
    fn complete(self: Box<Self>, outcome: CallOutcome) {
        (*self)(outcome)
    }
}

/// Correlation data handed to a stateless callback with each reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    /// Method whose reply arrived
    pub method_id: String,
    /// ID of the request message, as reported to the message-id callback
    pub request_message_id: Option<String>,
}

/// Statically registered receiver of stateless async replies
pub trait StatelessCallback: Send + Sync {
    fn on_reply(&self, context: &ReplyContext, outcome: CallOutcome);
}

/// How a pending call is completed
pub enum ReplyHandler {
    /// Hand the outcome to a thread blocked in a synchronous call
    Blocking(SyncSender<CallOutcome>),
    /// Run the completion object of an asynchronous call
    Callback(Box<dyn ReplyCallback>),
    /// Route to a stateless callback with the reply context
    Stateless(Arc<dyn StatelessCallback>, ReplyContext),
}

impl std::fmt::Debug for ReplyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ReplyHandler::Blocking(_) => "Blocking",
            ReplyHandler::Callback(_) => "Callback",
            ReplyHandler::Stateless(..) => "Stateless",
        };
        f.write_str(kind)
    }
}

impl ReplyHandler {
    fn invoke(self, outcome: CallOutcome) {
        match self {
            // the receiver is gone once the caller timed out
            ReplyHandler::Blocking(sender) => {
                let _ = sender.try_send(outcome);
            }
            ReplyHandler::Callback(callback) => callback.complete(outcome),
            ReplyHandler::Stateless(callback, context) => callback.on_reply(&context, outcome),
        }
    }
}

/// Pending call record
#[derive(Debug)]
struct PendingCall {
    handler: ReplyHandler,
    expiry: Instant,
}

/// Registry of pending calls and stateless callbacks
#[derive(Default)]
pub struct ReplyCallerDirectory {
    pending: Mutex<HashMap<String, PendingCall>>,
    stateless: Mutex<HashMap<String, Arc<dyn StatelessCallback>>>,
}

impl ReplyCallerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending call record
    ///
    /// Fails with [`Error::DuplicateCorrelation`] if the ID is already pending.
    pub fn register(
        &self,
        request_reply_id: impl Into<String>,
        handler: ReplyHandler,
        expiry: Instant,
    ) -> Result<()> {
        let request_reply_id = request_reply_id.into();
        let mut pending = self.pending.lock();
        if pending.contains_key(&request_reply_id) {
            return Err(Error::DuplicateCorrelation(request_reply_id));
        }
        trace!("register pending call {} ({:?})", request_reply_id, handler);
        pending.insert(request_reply_id, PendingCall { handler, expiry });
        Ok(())
    }

    /// Register the callback object of a stateless async use case
    ///
    /// Replaces a previously registered callback with the same ID.
    pub fn register_stateless_callback(
        &self,
        callback_id: impl Into<String>,
        callback: Arc<dyn StatelessCallback>,
    ) {
        let callback_id = callback_id.into();
        debug!("register stateless callback {}", callback_id);
        self.stateless.lock().insert(callback_id, callback);
    }

    pub fn unregister_stateless_callback(&self, callback_id: &str) -> bool {
        self.stateless.lock().remove(callback_id).is_some()
    }

    /// Complete the call registered under `request_reply_id`
    ///
    /// Returns `false` when nothing was pending under the ID (late or
    /// duplicate reply).
    pub fn resolve(&self, request_reply_id: &str, outcome: CallOutcome) -> bool {
        self.resolve_inner(request_reply_id, None, None, outcome)
    }

    /// Complete the call a received reply belongs to
    ///
    /// Stateless replies carry their method ID and the echoed request message
    /// ID on to the registered callback.
    pub fn resolve_reply(&self, reply: Reply) -> bool {
        self.resolve_inner(
            &reply.request_reply_id,
            reply.stateless_method_id.as_deref(),
            reply.request_message_id,
            reply.outcome.into_result(),
        )
    }

    fn resolve_inner(
        &self,
        request_reply_id: &str,
        stateless_method_id: Option<&str>,
        request_message_id: Option<String>,
        outcome: CallOutcome,
    ) -> bool {
        let record = self.pending.lock().remove(request_reply_id);
        if let Some(record) = record {
            if record.expiry <= Instant::now() {
                trace!("reply for {} arrived after its expiry", request_reply_id);
            }
            record.handler.invoke(outcome);
            return true;
        }

        if let Some((callback_id, method_id)) = StatelessAsyncIdCalculator::split(request_reply_id) {
            let callback = self.stateless.lock().get(callback_id).cloned();
            if let Some(callback) = callback {
                let context = ReplyContext {
                    method_id: stateless_method_id.unwrap_or(method_id).to_string(),
                    request_message_id,
                };
                ReplyHandler::Stateless(callback, context).invoke(outcome);
                return true;
            }
            warn!(
                "no stateless callback registered for {}, dropping reply",
                callback_id
            );
            return false;
        }

        debug!(
            "no pending call for {}, dropping late or duplicate reply",
            request_reply_id
        );
        false
    }

    /// Fail a pending call whose TTL elapsed
    ///
    /// Returns `false` if the call was already resolved.
    pub fn expire(&self, request_reply_id: &str, ttl: Duration) -> bool {
        let record = self.pending.lock().remove(request_reply_id);
        match record {
            Some(record) => {
                debug!("pending call {} expired after {:?}", request_reply_id, ttl);
                record.handler.invoke(Err(Error::Timeout {
                    request_reply_id: request_reply_id.to_string(),
                    ttl,
                }));
                true
            }
            None => false,
        }
    }

    /// Drop a pending call without running its handler
    pub fn remove(&self, request_reply_id: &str) -> bool {
        self.pending.lock().remove(request_reply_id).is_some()
    }

    pub fn contains(&self, request_reply_id: &str) -> bool {
        self.pending.lock().contains_key(request_reply_id)
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
