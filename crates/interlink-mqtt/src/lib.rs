//! MQTT transport skeleton for interlink
//!
//! Receives raw publishes from a broker connection, deduplicates them by
//! message ID, bounds the number of messages in flight and feeds them to the
//! message router. Acknowledgements to the broker follow processing, so a
//! message dropped for capacity is redelivered later.
//!
//! A process-wide [`MessageInProgressObserver`] can hold acknowledgements
//! back when too many messages are in progress, throttling the broker through
//! its receive maximum.
//!
//! # Modules
//!
//! - [`config`]: skeleton and backpressure settings
//! - [`client`]: broker client and status collaborators
//! - [`ledger`]: in-flight and recently processed message IDs
//! - [`backpressure`]: process-wide acknowledgement throttling
//! - [`skeleton`]: the receiving skeleton
//! - [`topic`]: multicast topic names

pub mod backpressure;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod skeleton;
pub mod topic;

pub use backpressure::{MessageInProgressObserver, OutstandingPublishes};
pub use client::{
    MqttClient, MqttStatusReceiver, NoOpRawMessagePreprocessor, NoOpStatusReceiver,
    RawMessagePreprocessor,
};
pub use config::MqttConfig;
pub use error::{MqttError, Result};
pub use ledger::{AckHandle, Admission, InFlightLedger};
pub use skeleton::MqttMessagingSkeleton;
