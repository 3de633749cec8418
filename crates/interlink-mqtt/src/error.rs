//! Error types for the MQTT transport skeleton

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("invalid MQTT configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] interlink::Error),

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("MQTT client error: {0}")]
    Client(String),
}

pub type Result<T> = std::result::Result<T, MqttError>;
