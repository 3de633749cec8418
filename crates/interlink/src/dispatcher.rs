//! Invocation dispatcher
//!
//! Turns one proxy method call into protocol messages. Each method kind has
//! its own entry point:
//!
//! | kind            | targets    | correlation state             | result            |
//! |-----------------|------------|-------------------------------|-------------------|
//! | one-way         | 1..N       | none                          | none              |
//! | sync            | exactly 1  | blocking handoff              | blocks until reply or TTL |
//! | async           | exactly 1  | completion callback + future  | [`ReplyFuture`]   |
//! | stateless async | exactly 1  | static callback by method ID  | message ID callback |
//!
//! Target and signature checks run before anything is registered or sent.
//! Application errors reach the caller as [`Error::Application`] only for
//! methods declaring modeled errors; for all others they become
//! [`Error::Runtime`].
//! A pending call moves `CREATED -> SENT -> RESOLVED | TIMED_OUT | FAILED`;
//! the directory guarantees only the first terminal transition is observed.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use crate::config::MessagingConfig;
use crate::correlation::{CallOutcome, ReplyCallback, ReplyCallerDirectory, ReplyHandler, StatelessCallback};
use crate::error::{Error, Result};
use crate::message::{Message, OneWayRequest, Payload, Request};
use crate::method::{MethodDescriptor, MethodKind};
use crate::stateless::{StatelessAsyncIdCalculator, StatelessBinding};
use crate::transport::MessageSender;
use crate::types::{MessagingQos, ParticipantId, ResolvedTargets};

/// Future of an asynchronous call
///
/// Completes with the reply outcome, or with [`Error::Timeout`] once the TTL
/// elapsed.
#[derive(Debug)]
pub struct ReplyFuture {
    request_reply_id: String,
    receiver: oneshot::Receiver<CallOutcome>,
}

impl ReplyFuture {
    pub fn request_reply_id(&self) -> &str {
        &self.request_reply_id
    }
}

impl Future for ReplyFuture {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CallOutcome> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Runtime(format!(
                "reply handler for {} dropped",
                self.request_reply_id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Dispatcher of one proxy participant
pub struct InvocationDispatcher {
    from: ParticipantId,
    stateless: Option<StatelessBinding>,
    directory: Arc<ReplyCallerDirectory>,
    sender: Arc<dyn MessageSender>,
    config: MessagingConfig,
}

impl InvocationDispatcher {
    pub fn new(
        from: ParticipantId,
        directory: Arc<ReplyCallerDirectory>,
        sender: Arc<dyn MessageSender>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            from,
            stateless: None,
            directory,
            sender,
            config,
        }
    }

    /// Enable stateless async calls under a fixed participant ID and use case
    pub fn with_stateless_binding(mut self, binding: StatelessBinding) -> Self {
        self.stateless = Some(binding);
        self
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.from
    }

    pub fn directory(&self) -> &Arc<ReplyCallerDirectory> {
        &self.directory
    }

    /// Register the callback object receiving replies of stateless calls
    pub fn register_stateless_callback(&self, callback: Arc<dyn StatelessCallback>) -> Result<()> {
        let binding = self.stateless_binding()?;
        self.directory
            .register_stateless_callback(binding.callback_id(), callback);
        Ok(())
    }

    /// Fire-and-forget call, fanned out to every target
    pub fn call_one_way(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        targets: &ResolvedTargets,
        qos: &MessagingQos,
    ) -> Result<()> {
        expect_kind(method, MethodKind::OneWay)?;
        targets.require_any(&method.name)?;
        let ttl = self.config.effective_ttl(qos.ttl);

        for target in targets.iter() {
            let message = Message::new(
                self.from.clone(),
                target.participant_id.as_str(),
                ttl,
                Payload::OneWay(OneWayRequest {
                    method_name: method.name.clone(),
                    param_datatypes: method.param_datatypes.clone(),
                    params: params.clone(),
                }),
            )
            .with_headers(&qos.custom_headers);
            debug!(
                "ONEWAYREQUEST call proxy: method: {}, messageId: {}, from: {}, to: {}",
                method.name, message.id, self.from, target.participant_id
            );
            self.sender.send(message)?;
        }
        Ok(())
    }

    /// Blocking request/reply call
    ///
    /// Blocks the calling thread for at most the effective TTL. Do not call it
    /// from a task of a current-thread runtime that also delivers the reply.
    pub fn call_sync(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        targets: &ResolvedTargets,
        qos: &MessagingQos,
    ) -> CallOutcome {
        expect_kind(method, MethodKind::Sync)?;
        let target = targets.exactly_one(&method.name)?;
        let ttl = self.config.effective_ttl(qos.ttl);
        let request_reply_id = uuid::Uuid::new_v4().to_string();

        let (tx, rx) = sync_channel(1);
        self.directory.register(
            request_reply_id.clone(),
            ReplyHandler::Blocking(tx),
            Instant::now() + ttl,
        )?;

        let message = self.request_message(method, params, &target.participant_id, ttl, qos, &request_reply_id, None);
        debug!(
            "REQUEST call proxy: method: {}, requestReplyId: {}, messageId: {}, from: {}, to: {}",
            method.name, request_reply_id, message.id, self.from, target.participant_id
        );
        if let Err(e) = self.sender.send(message) {
            self.directory.remove(&request_reply_id);
            return Err(e);
        }

        let outcome = match rx.recv_timeout(ttl) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                if self.directory.remove(&request_reply_id) {
                    debug!("REQUEST {} timed out after {:?}", request_reply_id, ttl);
                    return Err(Error::Timeout { request_reply_id, ttl });
                }
                // a resolver took the record and is about to hand over the reply
                rx.recv()
                    .unwrap_or(Err(Error::Timeout { request_reply_id, ttl }))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Runtime(format!(
                "reply handler for {} dropped",
                request_reply_id
            ))),
        };
        constrain_errors(method, outcome)
    }

    /// Asynchronous request/reply call
    ///
    /// Returns immediately. The optional completion object and the returned
    /// future both receive the outcome, on the thread that delivers the reply or
    /// on the runtime's timer when the TTL elapses. Must be called within a
    /// tokio runtime.
    pub fn call_async(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        targets: &ResolvedTargets,
        qos: &MessagingQos,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<ReplyFuture> {
        expect_kind(method, MethodKind::Async)?;
        let target = targets.exactly_one(&method.name)?;
        if !method.has_callback {
            return Err(Error::MissingCallback {
                method: method.name.clone(),
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::IllegalState("asynchronous calls need a tokio runtime".to_string())
        })?;

        let ttl = self.config.effective_ttl(qos.ttl);
        let request_reply_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let method_for_errors = method.clone();
        let handler = ReplyHandler::Callback(Box::new(move |outcome: CallOutcome| {
            let outcome = constrain_errors(&method_for_errors, outcome);
            if let Some(callback) = callback {
                callback.complete(outcome.clone());
            }
            let _ = tx.send(outcome);
        }));
        self.directory
            .register(request_reply_id.clone(), handler, Instant::now() + ttl)?;

        let message = self.request_message(method, params, &target.participant_id, ttl, qos, &request_reply_id, None);
        debug!(
            "REQUEST call proxy: method: {}, requestReplyId: {}, messageId: {}, from: {}, to: {}",
            method.name, request_reply_id, message.id, self.from, target.participant_id
        );

        let directory = self.directory.clone();
        let expiring_id = request_reply_id.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            directory.expire(&expiring_id, ttl);
        });

        if let Err(e) = self.sender.send(message) {
            timer.abort();
            self.directory.remove(&request_reply_id);
            return Err(e);
        }

        Ok(ReplyFuture {
            request_reply_id,
            receiver: rx,
        })
    }

    /// Stateless asynchronous call
    ///
    /// Nothing is registered per call; the reply is routed to the callback
    /// registered for the binding's use case. `on_message_id` receives the ID
    /// of the outbound request; the provider echoes it in the reply and the
    /// callback gets it back in its [`ReplyContext`](crate::correlation::ReplyContext).
    pub fn call_stateless_async(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        targets: &ResolvedTargets,
        qos: &MessagingQos,
        on_message_id: impl FnOnce(&str),
    ) -> Result<()> {
        expect_kind(method, MethodKind::StatelessAsync)?;
        let target = targets.exactly_one(&method.name)?;
        if !method.has_message_id_callback {
            return Err(Error::MissingCallback {
                method: method.name.clone(),
            });
        }
        let binding = self.stateless_binding()?;

        let ttl = self.config.effective_ttl(qos.ttl);
        let request_reply_id = StatelessAsyncIdCalculator::request_reply_id(binding, method);
        let method_id = StatelessAsyncIdCalculator::method_id(method);
        let mut message = self.request_message(
            method,
            params,
            &target.participant_id,
            ttl,
            qos,
            &request_reply_id,
            Some(method_id),
        );
        message.sender = binding.participant_id.clone();

        debug!(
            "STATELESS REQUEST call proxy: method: {}, requestReplyId: {}, messageId: {}, from: {}, to: {}",
            method.name, request_reply_id, message.id, message.sender, target.participant_id
        );
        let message_id = message.id.clone();
        self.sender.send(message)?;
        on_message_id(&message_id);
        Ok(())
    }

    fn stateless_binding(&self) -> Result<&StatelessBinding> {
        self.stateless.as_ref().ok_or_else(|| {
            Error::IllegalState(format!(
                "participant {} has no stateless async binding",
                self.from
            ))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn request_message(
        &self,
        method: &MethodDescriptor,
        params: Bytes,
        to: &ParticipantId,
        ttl: Duration,
        qos: &MessagingQos,
        request_reply_id: &str,
        stateless_method_id: Option<String>,
    ) -> Message {
        trace!("build request {} for {}", request_reply_id, method.signature());
        Message::new(
            self.from.clone(),
            to.as_str(),
            ttl,
            Payload::Request(Request {
                request_reply_id: request_reply_id.to_string(),
                method_name: method.name.clone(),
                param_datatypes: method.param_datatypes.clone(),
                params,
                stateless_method_id,
            }),
        )
        .with_headers(&qos.custom_headers)
    }
}

/// Demote application errors of methods without modeled errors
fn constrain_errors(method: &MethodDescriptor, outcome: CallOutcome) -> CallOutcome {
    match outcome {
        Err(Error::Application(error)) if !method.has_modeled_errors => {
            debug!(
                "method {} declares no errors, reporting {} as runtime failure",
                method.name, error
            );
            Err(Error::Runtime(error.to_string()))
        }
        outcome => outcome,
    }
}

fn expect_kind(method: &MethodDescriptor, kind: MethodKind) -> Result<()> {
    if method.kind != kind {
        return Err(Error::IllegalState(format!(
            "method {} is {:?}, dispatched as {:?}",
            method.name, method.kind, kind
        )));
    }
    Ok(())
}
