//! Error types for invocation dispatch and subscriptions

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Typed error defined by a remote interface contract.
///
/// Carried inside an otherwise successful reply envelope. Callers match on
/// `enumeration` and `value` to recover the modeled error case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    /// Fully qualified name of the error enumeration
    pub enumeration: String,
    /// Literal of the enumeration that was raised
    pub value: String,
    /// Optional human readable detail
    pub message: Option<String>,
}

impl ApplicationError {
    pub fn new(enumeration: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            enumeration: enumeration.into(),
            value: value.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.enumeration, self.value)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Errors raised by the invocation and subscription engine
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no target participant for {0}")]
    NoTarget(String),

    #[error("ambiguous target: {count} participants for {operation}, exactly one required")]
    AmbiguousTarget { operation: String, count: usize },

    #[error("method {method} has no designated callback parameter")]
    MissingCallback { method: String },

    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(String),

    #[error("request {request_reply_id} timed out after {ttl:?}")]
    Timeout {
        request_reply_id: String,
        ttl: Duration,
    },

    #[error("application error: {0}")]
    Application(ApplicationError),

    #[error("runtime failure: {0}")]
    Runtime(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("no compatible provider found: {0}")]
    NoCompatibleProvider(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("subscription {0} already expired")]
    SubscriptionExpired(String),

    #[error("publication missed for subscription {0}")]
    PublicationMissed(String),
}

impl Error {
    /// True for errors modeled by the remote interface contract
    pub fn is_application(&self) -> bool {
        matches!(self, Error::Application(_))
    }

    /// True when the error was synthesized because no reply arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True for precondition errors raised before any network action
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::NoTarget(_)
                | Error::AmbiguousTarget { .. }
                | Error::MissingCallback { .. }
                | Error::DuplicateCorrelation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
